use std::collections::HashMap;
use std::time::Duration;

use llmux_provider_core::{
    CooldownReason, CredentialPayload, CredentialPool, CredentialRecord, EventHub, PickError,
    ProviderFamily, RequestScope, Selector, Strategy,
};

fn api_key_record(id: &str, priority: i32, weight: u32) -> CredentialRecord {
    let mut record = CredentialRecord::new(
        id,
        ProviderFamily::ClaudeApi,
        CredentialPayload::ApiKey {
            api_key: format!("sk-{id}"),
            base_url: None,
            headers: Vec::new(),
        },
    );
    record.priority = priority;
    record.weight = weight;
    record
}

#[test]
fn round_robin_is_fair() {
    let selector = Selector::new();
    let candidates = vec![
        api_key_record("a", 0, 1),
        api_key_record("b", 0, 1),
        api_key_record("c", 0, 1),
    ];
    let scope = RequestScope::default();

    let mut counts: HashMap<String, usize> = HashMap::new();
    for _ in 0..1000 {
        let picked = selector
            .pick("claude-api", "m", Strategy::RoundRobin, &scope, &candidates)
            .unwrap();
        *counts.entry(picked.id).or_default() += 1;
    }

    for id in ["a", "b", "c"] {
        let share = counts[id] as f64;
        assert!((300.0..=367.0).contains(&share), "{id} picked {share} times");
    }
}

#[test]
fn weighted_pick_tracks_weights() {
    let selector = Selector::new();
    let candidates = vec![api_key_record("a", 0, 100), api_key_record("b", 0, 200)];
    let scope = RequestScope::default();

    let mut b_hits = 0usize;
    for _ in 0..1000 {
        let picked = selector
            .pick("claude-api", "m", Strategy::LoadBalance, &scope, &candidates)
            .unwrap();
        if picked.id == "b" {
            b_hits += 1;
        }
    }
    // Expected ~667 of 1000; allow +-10%.
    assert!((600..=733).contains(&b_hits), "b picked {b_hits} times");
}

#[test]
fn priority_always_wins_when_unique() {
    let selector = Selector::new();
    let candidates = vec![api_key_record("low", 5, 1), api_key_record("high", 1, 1)];
    let scope = RequestScope::default();

    for _ in 0..100 {
        let picked = selector
            .pick("claude-api", "m", Strategy::Priority, &scope, &candidates)
            .unwrap();
        assert_eq!(picked.id, "high");
    }
}

#[test]
fn tied_priorities_rotate() {
    let selector = Selector::new();
    let candidates = vec![
        api_key_record("a", 1, 1),
        api_key_record("b", 1, 1),
        api_key_record("z", 9, 1),
    ];
    let scope = RequestScope::default();

    let first = selector
        .pick("p", "m", Strategy::Priority, &scope, &candidates)
        .unwrap();
    let second = selector
        .pick("p", "m", Strategy::Priority, &scope, &candidates)
        .unwrap();
    assert_ne!(first.id, second.id);
    assert_ne!(first.id, "z");
    assert_ne!(second.id, "z");
}

#[test]
fn sticky_binds_and_rebinds_on_removal() {
    let selector = Selector::new();
    let mut candidates = vec![
        api_key_record("a", 0, 1),
        api_key_record("b", 0, 1),
        api_key_record("c", 0, 1),
    ];
    let mut scope = RequestScope::default();
    scope
        .headers
        .push(("X-Session-Id".to_string(), "s1".to_string()));

    let first = selector
        .pick("p", "m", Strategy::Sticky, &scope, &candidates)
        .unwrap();
    let second = selector
        .pick("p", "m", Strategy::Sticky, &scope, &candidates)
        .unwrap();
    assert_eq!(first.id, second.id);

    // Remove the bound credential; the next pick rebinds and stays stable.
    candidates.retain(|record| record.id != first.id);
    selector.forget_credential(&first.id);
    let third = selector
        .pick("p", "m", Strategy::Sticky, &scope, &candidates)
        .unwrap();
    assert_ne!(third.id, first.id);
    let fourth = selector
        .pick("p", "m", Strategy::Sticky, &scope, &candidates)
        .unwrap();
    assert_eq!(third.id, fourth.id);
}

#[test]
fn sticky_without_session_falls_back_to_priority() {
    let selector = Selector::new();
    let candidates = vec![api_key_record("a", 0, 1), api_key_record("b", 5, 1)];
    let picked = selector
        .pick("p", "m", Strategy::Sticky, &RequestScope::default(), &candidates)
        .unwrap();
    assert_eq!(picked.id, "a");
}

#[tokio::test]
async fn cooldown_excludes_then_readmits() {
    let pool = CredentialPool::new(EventHub::new(8));
    pool.upsert(api_key_record("a", 0, 1)).await;
    pool.upsert(api_key_record("b", 0, 1)).await;
    pool.report_cooldown("a", "m", Duration::from_millis(500), CooldownReason::RateLimit)
        .await;

    let selector = Selector::new();
    let scope = RequestScope::default();

    let candidates = pool.candidates(ProviderFamily::ClaudeApi).await;
    for _ in 0..10 {
        let picked = selector
            .pick("p", "m", Strategy::RoundRobin, &scope, &candidates)
            .unwrap();
        assert_eq!(picked.id, "b");
    }
    // Another model is unaffected by the per-model cooldown.
    let other = selector
        .pick("p", "other", Strategy::Priority, &scope, &candidates)
        .unwrap();
    assert_eq!(other.id, "a");

    tokio::time::sleep(Duration::from_millis(600)).await;
    let candidates = pool.candidates(ProviderFamily::ClaudeApi).await;
    let mut seen = std::collections::HashSet::new();
    for _ in 0..10 {
        seen.insert(
            selector
                .pick("p", "m", Strategy::RoundRobin, &scope, &candidates)
                .unwrap()
                .id,
        );
    }
    assert!(seen.contains("a"), "cooled credential is reconsidered");
}

#[tokio::test]
async fn all_cooling_reports_reset_in() {
    let pool = CredentialPool::new(EventHub::new(8));
    pool.upsert(api_key_record("a", 0, 1)).await;
    pool.report_cooldown("a", "m", Duration::from_secs(30), CooldownReason::Quota)
        .await;

    let selector = Selector::new();
    let candidates = pool.candidates(ProviderFamily::ClaudeApi).await;
    let err = selector
        .pick("p", "m", Strategy::Priority, &RequestScope::default(), &candidates)
        .unwrap_err();
    let PickError::Cooldown { reset_in } = err else {
        panic!("expected cooldown error");
    };
    assert!(reset_in > Duration::from_secs(25) && reset_in <= Duration::from_secs(30));
}

#[test]
fn empty_candidates_are_unavailable() {
    let selector = Selector::new();
    let err = selector
        .pick("p", "m", Strategy::Priority, &RequestScope::default(), &[])
        .unwrap_err();
    assert_eq!(err, PickError::Unavailable);
}
