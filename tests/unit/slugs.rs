//! Table slugs are stable and never collide within a base

use airtable_backup::output::{sanitize_filename, SlugRegistry};

#[test]
fn test_same_name_same_slug() {
    let mut registry = SlugRegistry::new();
    let first = registry.slug_for("Deals");
    assert_eq!(registry.slug_for("Deals"), first);
    assert_eq!(registry.len(), 1);
}

#[test]
fn test_unsafe_characters_replaced() {
    assert_eq!(sanitize_filename("Q1/Q2: Plans?"), "Q1_Q2_ Plans_");
    assert_eq!(sanitize_filename("  ..  "), "unnamed");
}

#[test]
fn test_case_insensitive_collision_gets_hash_suffix() {
    let mut registry = SlugRegistry::new();
    let upper = registry.slug_for("Deals");
    let lower = registry.slug_for("deals");

    assert_eq!(upper, "Deals");
    assert!(lower.starts_with("deals_"));
    assert_eq!(lower.len(), "deals_".len() + 8);
    assert_ne!(upper.to_lowercase(), lower.to_lowercase());
}

#[test]
fn test_names_sanitizing_alike_stay_distinct() {
    let mut registry = SlugRegistry::new();
    let slugs = [
        registry.slug_for("A/B"),
        registry.slug_for("A:B"),
        registry.slug_for("A?B"),
    ];

    assert_eq!(slugs[0], "A_B");
    assert_ne!(slugs[1], slugs[2]);
    assert!(slugs[1].starts_with("A_B_"));
    assert!(slugs[2].starts_with("A_B_"));
}

#[test]
fn test_assignment_is_deterministic_across_registries() {
    let names = ["Deals", "deals", "DEALS", "Tasks"];
    let run = || {
        let mut registry = SlugRegistry::new();
        names.iter().map(|n| registry.slug_for(n)).collect::<Vec<_>>()
    };
    assert_eq!(run(), run());
}
