//! Subject comparison and wildcard matching.
//!
//! Subjects are dot-separated tokens. In a subscription pattern `*` matches
//! exactly one token and `>` matches one or more trailing tokens.

/// Case-insensitive subject identity, used to decide whether a subscribe,
/// unsubscribe or auto-unsubscribe refers to the active subscription
pub fn same_subject(left: &str, right: &str) -> bool {
    left.eq_ignore_ascii_case(right)
}

/// Validate a subject used for publishing (no wildcards, no empty tokens)
pub fn is_valid_publish_subject(subject: &str) -> bool {
    !subject.is_empty()
        && subject
            .split('.')
            .all(|token| !token.is_empty() && token != "*" && token != ">" && !token.contains(' '))
}

/// Validate a subscription pattern (wildcards allowed, `>` only last)
pub fn is_valid_subscription_subject(pattern: &str) -> bool {
    if pattern.is_empty() {
        return false;
    }
    let tokens: Vec<&str> = pattern.split('.').collect();
    let last = tokens.len() - 1;
    tokens.iter().enumerate().all(|(index, token)| {
        !token.is_empty() && !token.contains(' ') && (*token != ">" || index == last)
    })
}

/// Whether a published subject is matched by a subscription pattern
pub fn subject_matches(pattern: &str, subject: &str) -> bool {
    let mut pattern_tokens = pattern.split('.');
    let mut subject_tokens = subject.split('.');

    loop {
        match (pattern_tokens.next(), subject_tokens.next()) {
            (Some(">"), Some(_)) => return true,
            (Some("*"), Some(_)) => continue,
            (Some(p), Some(s)) if p == s => continue,
            (None, None) => return true,
            _ => return false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_subject_ignores_case() {
        assert!(same_subject("orders", "ORDERS"));
        assert!(same_subject("Orders.Created", "orders.created"));
        assert!(!same_subject("orders", "orders.created"));
    }

    #[test]
    fn test_literal_matching() {
        assert!(subject_matches("orders", "orders"));
        assert!(!subject_matches("orders", "orders.created"));
        assert!(!subject_matches("orders.created", "orders"));
    }

    #[test]
    fn test_wildcard_matching() {
        assert!(subject_matches("orders.*", "orders.created"));
        assert!(!subject_matches("orders.*", "orders.created.eu"));
        assert!(subject_matches("orders.>", "orders.created.eu"));
        assert!(!subject_matches("orders.>", "orders"));
        assert!(subject_matches("*.created", "orders.created"));
        assert!(subject_matches(">", "anything.at.all"));
    }

    #[test]
    fn test_subject_validation() {
        assert!(is_valid_publish_subject("orders.created"));
        assert!(!is_valid_publish_subject("orders.*"));
        assert!(!is_valid_publish_subject("orders..created"));
        assert!(!is_valid_publish_subject(""));

        assert!(is_valid_subscription_subject("orders.>"));
        assert!(is_valid_subscription_subject("*.created"));
        assert!(!is_valid_subscription_subject("orders.>.created"));
        assert!(!is_valid_subscription_subject(""));
    }
}
