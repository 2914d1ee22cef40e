//! Bucket key resolution.
//!
//! Maps a method + request path to the canonical key Discord rate-limits on.
//! Sub-resource IDs below the segments listed in [`COLLAPSED_SEGMENTS`] share
//! one bucket, so their snowflakes are replaced with a placeholder. Message
//! deletion has its own bucket on Discord's side, so DELETE on a message path
//! gets a distinguishing suffix.

/// Path segments whose child snowflake is collapsed into one bucket.
const COLLAPSED_SEGMENTS: &[&str] = &[
    "messages",
    "members",
    "roles",
    "emojis",
    "stickers",
    "permissions",
    "reactions",
    "interactions",
];

/// Suffix distinguishing the message-deletion bucket from other
/// message operations on the same route.
const DELETE_SUFFIX: &str = "#delete";

/// Resolve the rate-limit bucket key for a request.
///
/// Two requests that Discord rate-limits together map to the same key;
/// requests it limits independently map to different keys. Unrecognized
/// path shapes pass through unchanged, which over-isolates (each literal
/// path gets its own bucket) but never under-isolates.
#[must_use]
pub fn bucket_key(method: &str, path: &str) -> String {
    let path = path.split('?').next().unwrap_or(path);
    let method = method.to_ascii_uppercase();

    let mut normalized = String::with_capacity(path.len());
    let mut previous: Option<&str> = None;
    let mut has_messages = false;

    for segment in path.split('/') {
        if segment.is_empty() {
            continue;
        }

        normalized.push('/');
        if previous.is_some_and(|p| COLLAPSED_SEGMENTS.contains(&p)) && is_snowflake(segment) {
            normalized.push_str(":id");
        } else {
            normalized.push_str(segment);
        }

        if segment == "messages" {
            has_messages = true;
        }
        previous = Some(segment);
    }

    if method == "DELETE" && has_messages {
        format!("{method} {normalized}{DELETE_SUFFIX}")
    } else {
        format!("{method} {normalized}")
    }
}

fn is_snowflake(segment: &str) -> bool {
    !segment.is_empty() && segment.bytes().all(|b| b.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collapses_message_ids_for_same_method() {
        let a = bucket_key("GET", "/channels/123/messages/1111");
        let b = bucket_key("GET", "/channels/123/messages/2222");
        assert_eq!(a, b);
        assert_eq!(a, "GET /channels/123/messages/:id");
    }

    #[test]
    fn delete_messages_has_its_own_bucket() {
        let get = bucket_key("GET", "/channels/123/messages/1111");
        let del = bucket_key("DELETE", "/channels/123/messages/1111");
        assert_ne!(get.split_once(' ').unwrap().1, del.split_once(' ').unwrap().1);
        assert!(del.ends_with("#delete"));
    }

    #[test]
    fn collapses_all_known_sub_resources() {
        for segment in COLLAPSED_SEGMENTS {
            let key = bucket_key("GET", &format!("/guilds/42/{segment}/98765"));
            assert!(key.ends_with(&format!("/{segment}/:id")), "key was {key}");
        }
    }

    #[test]
    fn top_level_resource_ids_are_kept() {
        // Top-level channel/guild IDs are real per-resource buckets.
        let a = bucket_key("GET", "/channels/123/messages");
        let b = bucket_key("GET", "/channels/456/messages");
        assert_ne!(a, b);
    }

    #[test]
    fn strips_query_string() {
        assert_eq!(
            bucket_key("GET", "/guilds/1/members?limit=1000"),
            "GET /guilds/1/members"
        );
    }

    #[test]
    fn unknown_shapes_pass_through() {
        assert_eq!(bucket_key("get", "/gateway/bot"), "GET /gateway/bot");
        assert_eq!(
            bucket_key("POST", "/webhooks/1/token-abc"),
            "POST /webhooks/1/token-abc"
        );
    }

    #[test]
    fn reaction_emoji_names_are_not_snowflakes() {
        // The emoji segment under "reactions" is textual, only numeric IDs collapse.
        let key = bucket_key("PUT", "/channels/1/messages/2/reactions/%F0%9F%91%8D/@me");
        assert_eq!(key, "PUT /channels/1/messages/:id/reactions/%F0%9F%91%8D/@me");
    }
}
