use proptest::prelude::*;

/// One subject token: lowercase word
pub fn token_strategy() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9_]{0,7}"
}

/// Literal subject of one to five tokens
pub fn subject_strategy() -> impl Strategy<Value = String> {
    prop::collection::vec(token_strategy(), 1..=5).prop_map(|tokens| tokens.join("."))
}

/// Subject plus a wildcard pattern derived from it that must match
pub fn matching_pattern_strategy() -> impl Strategy<Value = (String, String)> {
    prop::collection::vec(token_strategy(), 1..=5).prop_flat_map(|tokens| {
        let len = tokens.len();
        (
            Just(tokens),
            prop::collection::vec(any::<bool>(), len),
            0..len,
            any::<bool>(),
        )
            .prop_map(|(tokens, stars, tail_at, use_tail)| {
                let subject = tokens.join(".");
                let mut pattern: Vec<String> = tokens
                    .iter()
                    .zip(stars)
                    .map(|(token, star)| if star { "*".to_string() } else { token.clone() })
                    .collect();
                if use_tail {
                    pattern.truncate(tail_at);
                    pattern.push(">".to_string());
                }
                (subject, pattern.join("."))
            })
    })
}

/// Mixed case rendering of a subject
pub fn case_variant_strategy() -> impl Strategy<Value = (String, String)> {
    subject_strategy().prop_flat_map(|subject| {
        let len = subject.len();
        (Just(subject), prop::collection::vec(any::<bool>(), len)).prop_map(|(subject, upper)| {
            let variant = subject
                .chars()
                .zip(upper)
                .map(|(c, up)| if up { c.to_ascii_uppercase() } else { c })
                .collect();
            (subject, variant)
        })
    })
}
