//! Agent catalog management, selection, hot reload, and persistence.

use std::sync::Arc;
use std::time::Duration;

use leibniz::agent::{AgentDefinition, AgentPatch, DEFAULT_AGENT_ID};
use leibniz::config::ServiceConfig;
use leibniz::loader::Embedder;
use leibniz::model::ModelCaller;
use leibniz::service::ExecutionService;
use leibniz::store::MemoryStore;
use leibniz::testing::{FixedEmbedder, ScriptedCaller};
use leibniz::LeibnizError;

fn test_config(dir: &tempfile::TempDir) -> ServiceConfig {
    ServiceConfig {
        agents_dir: dir.path().join("agents"),
        watch_agents: false,
        database_path: None,
        ..ServiceConfig::default()
    }
}

async fn service(config: ServiceConfig) -> Arc<ExecutionService> {
    ExecutionService::start_with(
        config,
        Arc::new(ScriptedCaller::repeating("done")) as Arc<dyn ModelCaller>,
        Arc::new(MemoryStore::new()),
        None,
    )
    .await
    .expect("service should start")
}

#[tokio::test]
async fn the_default_and_web_researcher_agents_always_exist() {
    let dir = tempfile::tempdir().unwrap();
    let service = service(test_config(&dir)).await;

    assert!(service.get_agent(DEFAULT_AGENT_ID).is_ok());
    assert!(service.get_agent("web-researcher").is_ok());
}

#[tokio::test]
async fn the_default_agent_cannot_be_deleted() {
    let dir = tempfile::tempdir().unwrap();
    let service = service(test_config(&dir)).await;

    let err = service
        .delete_agent(DEFAULT_AGENT_ID)
        .expect_err("deleting default must fail");

    assert!(matches!(err, LeibnizError::InvalidArgument(_)));
    assert!(service.get_agent(DEFAULT_AGENT_ID).is_ok());
}

#[tokio::test]
async fn create_update_delete_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let service = service(test_config(&dir)).await;

    let created = service
        .create_agent(AgentDefinition::new("helper", "Helper"), false)
        .expect("create should succeed");
    assert_eq!(created.id, "helper");

    let err = service
        .create_agent(AgentDefinition::new("helper", "Helper Again"), false)
        .expect_err("duplicate id must fail");
    assert!(matches!(err, LeibnizError::AlreadyExists(_)));

    let updated = service
        .update_agent(
            "helper",
            AgentPatch {
                description: Some("now with a description".into()),
                ..AgentPatch::default()
            },
            false,
        )
        .expect("update should succeed");
    assert_eq!(updated.description, "now with a description");
    assert!(updated.updated_at >= created.updated_at);
    assert_eq!(updated.name, "Helper", "unset fields stay untouched");

    service.delete_agent("helper").expect("delete should succeed");
    assert!(matches!(
        service.get_agent("helper"),
        Err(LeibnizError::NotFound(_))
    ));

    assert!(matches!(
        service.update_agent("helper", AgentPatch::default(), false),
        Err(LeibnizError::NotFound(_))
    ));
}

#[tokio::test]
async fn an_agent_with_an_empty_id_gets_a_slug_from_its_name() {
    let dir = tempfile::tempdir().unwrap();
    let service = service(test_config(&dir)).await;

    let created = service
        .create_agent(AgentDefinition::new("", "My Helper"), false)
        .expect("create should succeed");

    assert_eq!(created.id, "my-helper");
}

#[tokio::test]
async fn save_as_file_writes_a_definition_into_the_agents_dir() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(&dir);
    let agents_dir = config.agents_dir.clone();
    let service = service(config).await;

    service
        .create_agent(AgentDefinition::new("saved", "Saved"), true)
        .expect("create should succeed");

    assert!(agents_dir.join("saved.toml").exists());
}

#[tokio::test]
async fn hot_reload_publishes_and_prunes_file_backed_agents() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(&dir);
    config.watch_agents = true;
    let agents_dir = config.agents_dir.clone();
    let service = service(config).await;

    let file = agents_dir.join("hot.toml");
    std::fs::write(
        &file,
        "id = \"hot\"\nname = \"Hot Agent\"\nsystem_prompt = \"fresh\"\n",
    )
    .expect("agent file should be written");

    let mut appeared = false;
    for _ in 0..100 {
        if service.get_agent("hot").is_ok() {
            appeared = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(appeared, "created file should hot-load the agent");

    std::fs::remove_file(&file).expect("agent file should be removed");

    let mut pruned = false;
    for _ in 0..100 {
        if service.get_agent("hot").is_err() {
            pruned = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(pruned, "removed file should drop the agent");

    service.close().await.unwrap();
}

#[tokio::test]
async fn find_best_agent_without_an_embedder_returns_the_default() {
    let dir = tempfile::tempdir().unwrap();
    let service = service(test_config(&dir)).await;

    let best = service
        .find_best_agent("anything")
        .await
        .expect("selection should succeed");

    assert_eq!(best.agent_id, DEFAULT_AGENT_ID);
    assert_eq!(best.similarity, 0.0);
}

#[tokio::test]
async fn similarity_selection_is_stable_and_ranked() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(&dir);
    std::fs::create_dir_all(&config.agents_dir).unwrap();
    std::fs::write(
        config.agents_dir.join("calc.toml"),
        "id = \"calc-bot\"\nname = \"Calc Bot\"\ndescription = \"math arithmetic\"\n",
    )
    .unwrap();
    std::fs::write(
        config.agents_dir.join("writer.toml"),
        "id = \"writer\"\nname = \"Writer\"\ndescription = \"prose essays\"\n",
    )
    .unwrap();

    let embedder: Arc<dyn Embedder> = Arc::new(FixedEmbedder::new(
        vec![
            ("math".into(), vec![1.0, 0.0]),
            ("prose".into(), vec![0.0, 1.0]),
        ],
        vec![0.6, 0.6],
    ));
    let service = ExecutionService::start_with(
        config,
        Arc::new(ScriptedCaller::repeating("done")) as Arc<dyn ModelCaller>,
        Arc::new(MemoryStore::new()),
        Some(embedder),
    )
    .await
    .expect("service should start");

    // Deterministic embeddings instead of the background recompute.
    for def in service.library().list() {
        service
            .library()
            .selector()
            .refresh(&def.id, &def.descriptor())
            .await;
    }

    let first = service.find_best_agent("a math question").await.unwrap();
    let second = service.find_best_agent("a math question").await.unwrap();
    assert_eq!(first.agent_id, "calc-bot");
    assert_eq!(first.agent_id, second.agent_id, "selection must be stable");

    let top = service.find_top_agents("a math question", 0).await.unwrap();
    assert_eq!(top.len(), 2, "top_n <= 0 defaults to 3, capped by catalog");
    assert_eq!(top[0].agent_id, "calc-bot");
    assert!(top[0].similarity >= top[1].similarity);
}

#[tokio::test]
async fn health_reports_service_identity_and_counts() {
    let dir = tempfile::tempdir().unwrap();
    let service = service(test_config(&dir)).await;

    let health = service.health();

    assert_eq!(health.status, "healthy");
    assert_eq!(health.service, "leibniz");
    assert!(!health.version.is_empty());
    assert!(health.details.get("agents").is_some());
    assert!(health.details.get("tools").is_some());
}

#[tokio::test]
async fn agents_and_history_survive_a_restart_with_sqlite() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("leibniz.db");
    let make_config = || ServiceConfig {
        agents_dir: dir.path().join("agents"),
        watch_agents: false,
        database_path: Some(db_path.clone()),
        ..ServiceConfig::default()
    };

    let record_id = {
        let service = ExecutionService::start(
            make_config(),
            Arc::new(ScriptedCaller::repeating("done")) as Arc<dyn ModelCaller>,
        )
        .await
        .expect("service should start");

        service
            .create_agent(AgentDefinition::new("persistent", "Persistent"), false)
            .unwrap();
        let record = service
            .execute_with_agent("persistent", "remember me")
            .await
            .unwrap();
        service.close().await.unwrap();
        record.id
    };

    let reborn = ExecutionService::start(
        make_config(),
        Arc::new(ScriptedCaller::repeating("done")) as Arc<dyn ModelCaller>,
    )
    .await
    .expect("service should restart");

    assert!(reborn.get_agent("persistent").is_ok());
    let record = reborn
        .get_execution(&record_id)
        .expect("history should survive the restart");
    assert_eq!(record.request, "remember me");
}
