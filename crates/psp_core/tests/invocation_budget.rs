use psp_core::strategy::invocation::{InvocationError, PROMPT_HEADER};
use psp_core::{
    AccessLevel, AppManifest, AppRegistryError, EngineConfig, EngineError, HiNataRecord,
    PersonalizationEngine, QueryContext,
};
use uuid::Uuid;

const NOW: i64 = 1_800_000_000_000;
const DAY_MS: i64 = 86_400_000;

fn seeded_engine(config: EngineConfig) -> PersonalizationEngine {
    let engine = PersonalizationEngine::open_in_memory(config).unwrap();
    let mut records = Vec::new();
    for (days_ago, source_app, highlight, access_level) in [
        (1, "reader", "Rust ownership keeps concurrency bugs away", AccessLevel::Public),
        (2, "reader", "Rust traits give zero cost abstraction", AccessLevel::Shared),
        (3, "browser", "Sourdough starter needs daily feeding", AccessLevel::Public),
        (4, "browser", "Sourdough crumb depends on hydration", AccessLevel::Public),
        (1, "journal", "Private worry about the quarterly review", AccessLevel::Private),
    ] {
        let mut record = HiNataRecord::with_id(
            Uuid::new_v4(),
            NOW - days_ago * DAY_MS,
            source_app,
            highlight,
            "",
        );
        record.access_level = access_level;
        record.tags = vec![source_app.to_string()];
        records.push(record);
    }
    engine.submit_hinata_batch(&records).unwrap();
    engine.run_production_at(NOW).unwrap();
    engine
}

fn context(query: &str, char_budget: usize) -> QueryContext {
    let mut context = QueryContext::new(query);
    context.char_budget = char_budget;
    context.now_ms = NOW;
    context
}

#[test]
fn empty_store_yields_empty_prompt() {
    let engine = PersonalizationEngine::open_in_memory(EngineConfig::default()).unwrap();

    let prompt = engine.get_personalized_prompt(&context("anything", 500)).unwrap();
    assert!(prompt.is_empty());
    assert_eq!(prompt.invocation_id, None);
    assert_eq!(prompt.char_count, 0);
    assert!(!prompt.truncated);
    assert_eq!(engine.stats().unwrap().fragments.invocations, 0);
}

#[test]
fn prompt_respects_char_budget() {
    let engine = seeded_engine(EngineConfig::default());

    for budget in [60, 120, 250, 600, 2_000] {
        let prompt = engine
            .get_personalized_prompt(&context("rust sourdough", budget))
            .unwrap();
        assert!(prompt.char_count <= budget, "budget {budget} exceeded");
        assert_eq!(prompt.char_count, prompt.text.chars().count());
        assert_eq!(prompt.char_budget, budget);
        if !prompt.is_empty() {
            assert!(prompt.text.starts_with(PROMPT_HEADER));
            assert_eq!(prompt.text.lines().count(), prompt.fragment_ids.len() + 1);
        }
    }
}

#[test]
fn budget_smaller_than_header_is_empty_and_truncated() {
    let engine = seeded_engine(EngineConfig::default());

    let prompt = engine.get_personalized_prompt(&context("rust", 5)).unwrap();
    assert!(prompt.is_empty());
    assert!(prompt.truncated);
    assert_eq!(prompt.invocation_id, None);
}

#[test]
fn max_fragments_caps_selection() {
    let engine = seeded_engine(EngineConfig::default());

    let mut ctx = context("rust", 2_000);
    ctx.max_fragments = 2;
    let prompt = engine.get_personalized_prompt(&ctx).unwrap();

    assert_eq!(prompt.fragment_ids.len(), 2);
    assert!(prompt.truncated);
}

#[test]
fn query_relevant_fragment_ranks_first() {
    let engine = seeded_engine(EngineConfig::default());

    let mut ctx = context("sourdough", 2_000);
    ctx.max_fragments = 1;
    let prompt = engine.get_personalized_prompt(&ctx).unwrap();
    assert_eq!(prompt.fragment_ids.len(), 1);

    let fragments = engine.list_fragments(false).unwrap();
    let chosen = fragments
        .iter()
        .find(|fragment| fragment.id == prompt.fragment_ids[0])
        .unwrap();
    assert!(chosen.keywords.iter().any(|keyword| keyword == "sourdough"));
}

#[test]
fn private_text_never_reaches_prompt() {
    let engine = seeded_engine(EngineConfig::default());

    let prompt = engine
        .get_personalized_prompt(&context("quarterly review worry", 4_000))
        .unwrap();
    assert!(!prompt.text.contains("Private worry about the quarterly review"));
}

#[test]
fn invocation_is_persisted_for_non_empty_prompt() {
    let engine = seeded_engine(EngineConfig::default());

    let first = engine.get_personalized_prompt(&context("rust", 800)).unwrap();
    let second = engine.get_personalized_prompt(&context("rust", 800)).unwrap();

    assert!(first.invocation_id.is_some());
    assert_ne!(first.invocation_id, second.invocation_id);
    assert_eq!(first.text, second.text);
    assert_eq!(engine.stats().unwrap().fragments.invocations, 2);
}

#[test]
fn invalid_context_is_rejected() {
    let engine = seeded_engine(EngineConfig::default());

    let err = engine.get_personalized_prompt(&context("rust", 0)).unwrap_err();
    assert!(matches!(
        err,
        EngineError::Invocation(InvocationError::InvalidContext(_))
    ));

    let mut ctx = context("rust", 500);
    ctx.max_fragments = 0;
    let err = engine.get_personalized_prompt(&ctx).unwrap_err();
    assert!(matches!(
        err,
        EngineError::Invocation(InvocationError::InvalidContext(_))
    ));
}

#[test]
fn prompt_scope_is_enforced_for_registered_apps() {
    let config = EngineConfig {
        apps: vec![
            AppManifest {
                id: "reader".to_string(),
                version: "1.0.0".to_string(),
                scopes: vec!["submit".to_string()],
            },
            AppManifest {
                id: "assistant".to_string(),
                version: "0.3.1".to_string(),
                scopes: vec!["prompt".to_string(), "feedback".to_string()],
            },
        ],
        ..EngineConfig::default()
    };
    let engine = PersonalizationEngine::open_in_memory(config).unwrap();

    assert!(engine.prompt_for("rust", Some("assistant")).is_ok());

    let err = engine.prompt_for("rust", Some("reader")).unwrap_err();
    assert!(matches!(
        err,
        EngineError::Unauthorized(AppRegistryError::ScopeDenied { .. })
    ));

    let err = engine.prompt_for("rust", None).unwrap_err();
    assert!(matches!(
        err,
        EngineError::Unauthorized(AppRegistryError::MissingAppId(_))
    ));
}
