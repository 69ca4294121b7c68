//! End-to-end tests of the task pipeline over in-memory backends.

mod common;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast::error::TryRecvError;

use common::{
    harness, harness_with_index, harness_with_store, FlakyStore, LeakyIndex, MockScraper,
    ScriptedModel,
};
use pagewise::consumer::TaskOutcome;
use pagewise::conversation::{
    ConversationManager, ConversationState, PersistOutcome, RehydrateOutcome, SYSTEM_PROMPT,
};
use pagewise::status::{MirrorOutcome, StatusTracker};
use pagewise::ingest::IngestionPipeline;
use pagewise::producer::enqueue_url;
use pagewise_core::index::VectorIndex;
use pagewise_core::models::{ProcessResult, Role, TaskPayload, TaskStatus, Turn, UrlTaskMapping};
use pagewise_core::queue::TaskQueue;
use pagewise_core::store::RecordStore;

fn payload(url: &str, task_id: &str) -> TaskPayload {
    TaskPayload {
        url: url.to_string(),
        task_id: task_id.to_string(),
    }
}

// ─── Consumer ───────────────────────────────────────────────────────

#[tokio::test]
async fn test_reachable_page_completes_task() {
    let h = harness(
        ScriptedModel::new(),
        MockScraper::default().with_page("http://example.com", "Hello world"),
    );
    let mut notifications = h.queue.subscribe();
    h.queue
        .push(&payload("http://example.com", "t1"))
        .await
        .unwrap();

    let outcome = h.services.consumer.poll_once().await.unwrap();
    assert_eq!(
        outcome,
        Some(TaskOutcome::Done {
            task_id: "t1".into(),
            url: "http://example.com".into()
        })
    );

    assert_eq!(h.store.get_status("t1").await.unwrap(), Some(TaskStatus::Done));

    let entry = h.store.get_cache("http://example.com").await.unwrap().unwrap();
    assert_eq!(entry.url, "http://example.com");
    assert_eq!(entry.summary, "A greeting page.");
    assert_eq!(entry.sentiment, "neutral");
    assert!(entry.conversation.is_empty());

    let note = notifications.try_recv().unwrap();
    assert_eq!(note.channel, "process:results");
    let result: ProcessResult = serde_json::from_str(&note.payload).unwrap();
    assert_eq!(result.task_id, "t1");
    assert_eq!(result.url, "http://example.com");
    assert_eq!(result.result.summary, "A greeting page.");
    assert!(matches!(notifications.try_recv(), Err(TryRecvError::Empty)));
}

#[tokio::test]
async fn test_stale_payload_does_not_redirect_url_mapping() {
    let h = harness(
        ScriptedModel::new(),
        MockScraper::default().with_page("http://example.com", "Hello world"),
    );
    let current = UrlTaskMapping {
        task_id: "current".into(),
        status: TaskStatus::Pending,
    };
    h.store
        .set_url_mapping("http://example.com", &current)
        .await
        .unwrap();
    h.queue
        .push(&payload("http://example.com", "other"))
        .await
        .unwrap();

    h.services.consumer.poll_once().await.unwrap();

    assert_eq!(
        h.store.get_url_mapping("http://example.com").await.unwrap(),
        Some(current)
    );
    assert_eq!(h.store.get_status("other").await.unwrap(), Some(TaskStatus::Done));
}

#[tokio::test]
async fn test_mirror_write_failure_is_reported_not_fatal() {
    let store = FlakyStore {
        fail_set_url_mapping: true,
        ..Default::default()
    };
    store
        .inner
        .set_url_mapping(
            "http://example.com",
            &UrlTaskMapping {
                task_id: "t1".into(),
                status: TaskStatus::Pending,
            },
        )
        .await
        .unwrap();
    let h = harness_with_store(
        ScriptedModel::new(),
        MockScraper::default().with_page("http://example.com", "Hello world"),
        store,
    );

    let tracker = StatusTracker::new(h.services.store.clone());
    let update = tracker
        .transition("t1", Some("http://example.com"), TaskStatus::Processing)
        .await
        .unwrap();
    assert!(matches!(update.mirror, MirrorOutcome::Failed(_)));
    assert_eq!(
        h.store.get_status("t1").await.unwrap(),
        Some(TaskStatus::Processing)
    );
    assert_eq!(
        h.store
            .get_url_mapping("http://example.com")
            .await
            .unwrap()
            .unwrap()
            .status,
        TaskStatus::Pending
    );
}

#[tokio::test]
async fn test_fetch_error_fails_task() {
    let h = harness(ScriptedModel::new(), MockScraper::default());
    let mut notifications = h.queue.subscribe();
    h.queue
        .push(&payload("http://example.com", "t1"))
        .await
        .unwrap();

    let outcome = h.services.consumer.poll_once().await.unwrap().unwrap();
    match outcome {
        TaskOutcome::Failed { task_id, reason, .. } => {
            assert_eq!(task_id, "t1");
            assert!(reason.contains("404"), "reason: {}", reason);
        }
        other => panic!("expected failure, got {:?}", other),
    }

    assert_eq!(
        h.store.get_status("t1").await.unwrap(),
        Some(TaskStatus::Failed)
    );
    assert!(h.store.get_cache("http://example.com").await.unwrap().is_none());
    assert!(matches!(notifications.try_recv(), Err(TryRecvError::Empty)));
}

#[tokio::test]
async fn test_model_failure_fails_task_without_cache() {
    let mut model = ScriptedModel::new();
    model.fail_summary = true;
    let h = harness(
        model,
        MockScraper::default().with_page("http://example.com", "Hello world"),
    );
    h.queue
        .push(&payload("http://example.com", "t1"))
        .await
        .unwrap();

    let outcome = h.services.consumer.poll_once().await.unwrap().unwrap();
    assert!(matches!(outcome, TaskOutcome::Failed { .. }));
    assert!(h.store.get_cache("http://example.com").await.unwrap().is_none());
    // Ingestion ran before the summary failed.
    assert_eq!(h.index.count_for_task("t1").await.unwrap(), 1);
}

#[tokio::test]
async fn test_sentiment_is_taken_from_summary() {
    let h = harness(
        ScriptedModel::new(),
        MockScraper::default().with_page("http://example.com", "Hello world, a long page body"),
    );
    h.queue
        .push(&payload("http://example.com", "t1"))
        .await
        .unwrap();
    h.services.consumer.poll_once().await.unwrap();

    let inputs = h.model.sentiment_inputs.lock().unwrap().clone();
    assert_eq!(inputs, vec!["A greeting page.".to_string()]);
}

#[tokio::test]
async fn test_empty_queue_times_out() {
    let h = harness(ScriptedModel::new(), MockScraper::default());
    assert_eq!(h.services.consumer.poll_once().await.unwrap(), None);
}

#[tokio::test]
async fn test_enqueued_url_mapping_is_mirrored() {
    let h = harness(
        ScriptedModel::new(),
        MockScraper::default().with_page("http://example.com", "Hello world"),
    );
    let enqueued = enqueue_url(h.store.as_ref(), h.queue.as_ref(), "http://example.com")
        .await
        .unwrap();

    h.services.consumer.poll_once().await.unwrap();

    let mapping = h
        .store
        .get_url_mapping("http://example.com")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(mapping.task_id, enqueued.task_id);
    assert_eq!(mapping.status, TaskStatus::Done);
}

#[tokio::test]
async fn test_status_never_leaves_terminal_state() {
    let h = harness(
        ScriptedModel::new(),
        MockScraper::default().with_page("http://example.com", "Hello world"),
    );
    h.queue
        .push(&payload("http://example.com", "t1"))
        .await
        .unwrap();
    h.services.consumer.poll_once().await.unwrap();

    // Redelivery of a finished task must not reopen it.
    h.queue
        .push(&payload("http://example.com", "t1"))
        .await
        .unwrap();
    let outcome = h.services.consumer.poll_once().await.unwrap().unwrap();
    assert!(matches!(outcome, TaskOutcome::Skipped { .. }));
    assert_eq!(h.store.get_status("t1").await.unwrap(), Some(TaskStatus::Done));
}

#[tokio::test]
async fn test_consumer_run_stops_on_shutdown() {
    let h = harness(
        ScriptedModel::new(),
        MockScraper::default().with_page("http://example.com", "Hello world"),
    );
    h.queue
        .push(&payload("http://example.com", "t1"))
        .await
        .unwrap();
    h.queue
        .push(&payload("http://missing.example", "t2"))
        .await
        .unwrap();

    let (tx, rx) = tokio::sync::watch::channel(false);
    let consumer = h.services.consumer.clone();
    let handle = tokio::spawn(async move { consumer.run(rx).await });

    for _ in 0..100 {
        if h.store.get_status("t2").await.unwrap() == Some(TaskStatus::Failed) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap()
        .unwrap();

    assert_eq!(h.store.get_status("t1").await.unwrap(), Some(TaskStatus::Done));
    assert_eq!(
        h.store.get_status("t2").await.unwrap(),
        Some(TaskStatus::Failed)
    );
}

// ─── Retrieval ──────────────────────────────────────────────────────

#[tokio::test]
async fn test_retrieval_for_unindexed_task_is_empty() {
    let h = harness(ScriptedModel::new(), MockScraper::default());
    let context = h
        .services
        .retriever
        .retrieve("nobody", "anything about rust")
        .await
        .unwrap();
    assert_eq!(context, "");
}

#[tokio::test]
async fn test_retrieval_rechecks_task_filter() {
    let h = harness_with_index(
        ScriptedModel::new(),
        MockScraper::default(),
        Arc::new(LeakyIndex::default()),
    );
    h.services
        .ingestion
        .ingest("t1", "rust rust rust ownership and borrowing")
        .await;
    h.services
        .ingestion
        .ingest("t2", "python notebooks for data science")
        .await;

    let context = h
        .services
        .retriever
        .retrieve("t2", "tell me about rust")
        .await
        .unwrap();
    assert_eq!(context, "python notebooks for data science");

    let context = h
        .services
        .retriever
        .retrieve("t3", "tell me about rust")
        .await
        .unwrap();
    assert_eq!(context, "");
}

#[tokio::test]
async fn test_retrieval_keeps_top_three_by_similarity() {
    let h = harness(ScriptedModel::new(), MockScraper::default());
    // Max size 7 puts exactly five words in each chunk.
    let pipeline = IngestionPipeline::new(h.model.clone(), h.index.clone(), 7);
    let text = "cooking pasta tonight with friends. \
                rust rust rust compiler errors. \
                music concert downtown this evening. \
                rust traits generics and lifetimes. \
                rust python bindings with pyo3.";
    let outcome = pipeline.ingest("t1", text).await;
    assert_eq!(outcome.written(), 5);

    let context = h.services.retriever.retrieve("t1", "rust").await.unwrap();
    assert_eq!(
        context,
        "rust traits generics and lifetimes. \
         rust rust rust compiler errors. \
         rust python bindings with pyo3."
    );
}

// ─── Conversation ───────────────────────────────────────────────────

#[tokio::test]
async fn test_chat_without_indexed_context() {
    let h = harness(ScriptedModel::new(), MockScraper::default());
    h.store.set_status("t2", TaskStatus::Done).await.unwrap();

    assert_eq!(
        h.services.conversations.rehydrate("t2").await,
        RehydrateOutcome::Empty
    );
    let reply = h
        .services
        .conversations
        .chat("t2", "What is this page about?")
        .await
        .unwrap();
    assert_eq!(reply.answer, "Sure.");

    let sent = h.model.last_chat();
    assert_eq!(sent[0], Turn::system(SYSTEM_PROMPT));
    assert_eq!(sent.last().unwrap(), &Turn::user("What is this page about?"));

    assert_eq!(reply.persistence.confirm().await, PersistOutcome::Applied);
    assert_eq!(
        h.store.get_conversation("t2").await.unwrap().unwrap(),
        vec![
            Turn::user("What is this page about?"),
            Turn::assistant("Sure.")
        ]
    );
}

#[tokio::test]
async fn test_chat_wraps_retrieved_context() {
    let h = harness(ScriptedModel::new(), MockScraper::default());
    h.services
        .ingestion
        .ingest("t1", "rust ownership rules explained")
        .await;

    let reply = h
        .services
        .conversations
        .chat("t1", "How does rust manage memory?")
        .await
        .unwrap();
    reply.persistence.confirm().await;

    let user = h.model.last_chat().last().cloned().unwrap();
    assert_eq!(user.role, Role::User);
    assert_eq!(
        user.content,
        "Use the following context: rust ownership rules explained to answer the following question: How does rust manage memory?"
    );
}

#[tokio::test]
async fn test_history_is_resent_each_turn() {
    let h = harness(ScriptedModel::new(), MockScraper::default());
    let c = &h.services.conversations;
    c.reset("t1").await;
    c.chat("t1", "first").await.unwrap().persistence.confirm().await;
    c.chat("t1", "second").await.unwrap().persistence.confirm().await;

    let sent = h.model.last_chat();
    assert_eq!(
        sent,
        vec![
            Turn::system(SYSTEM_PROMPT),
            Turn::user("first"),
            Turn::assistant("Sure."),
            Turn::user("second"),
        ]
    );
    assert_eq!(c.state("t1").await, ConversationState::Active);
}

#[tokio::test]
async fn test_rehydration_restores_persisted_transcript() {
    let h = harness(ScriptedModel::new(), MockScraper::default());
    h.store
        .set_conversation("t1", &[Turn::user("earlier"), Turn::assistant("reply")])
        .await
        .unwrap();

    let c = &h.services.conversations;
    assert_eq!(c.state("t1").await, ConversationState::Uninitialized);
    assert_eq!(c.rehydrate("t1").await, RehydrateOutcome::Restored(2));
    assert_eq!(c.state("t1").await, ConversationState::Active);

    c.chat("t1", "again").await.unwrap().persistence.confirm().await;
    assert_eq!(
        h.store.get_conversation("t1").await.unwrap().unwrap(),
        vec![
            Turn::user("earlier"),
            Turn::assistant("reply"),
            Turn::user("again"),
            Turn::assistant("Sure."),
        ]
    );
}

#[tokio::test]
async fn test_reset_discards_memory() {
    let h = harness(ScriptedModel::new(), MockScraper::default());
    let c = &h.services.conversations;
    c.chat("t1", "hello").await.unwrap().persistence.confirm().await;
    c.reset("t1").await;

    assert_eq!(c.state("t1").await, ConversationState::RehydratedEmpty);
    assert_eq!(c.transcript("t1").await, vec![Turn::system(SYSTEM_PROMPT)]);
}

#[tokio::test]
async fn test_chat_failure_propagates_and_keeps_user_turn() {
    let mut model = ScriptedModel::new();
    model.fail_chat = true;
    let h = harness(model, MockScraper::default());
    let c = &h.services.conversations;
    c.reset("t1").await;

    assert!(c.chat("t1", "hello").await.is_err());
    assert!(c.chat("t1", "hello again").await.is_err());

    let transcript = c.transcript("t1").await;
    assert_eq!(
        transcript,
        vec![
            Turn::system(SYSTEM_PROMPT),
            Turn::user("hello"),
            Turn::user("hello again"),
        ]
    );
    assert!(h.store.get_conversation("t1").await.unwrap().is_none());
}

#[tokio::test]
async fn test_conversation_mirrored_into_cache_entry() {
    let h = harness(
        ScriptedModel::new(),
        MockScraper::default().with_page("http://example.com", "Hello world"),
    );
    let enqueued = enqueue_url(h.store.as_ref(), h.queue.as_ref(), "http://example.com")
        .await
        .unwrap();
    h.services.consumer.poll_once().await.unwrap();

    let reply = h
        .services
        .conversations
        .chat(&enqueued.task_id, "Who is greeted?")
        .await
        .unwrap();
    assert_eq!(reply.persistence.confirm().await, PersistOutcome::Applied);

    let entry = h.store.get_cache("http://example.com").await.unwrap().unwrap();
    assert_eq!(entry.conversation.len(), 2);
    assert_eq!(entry.conversation[1], Turn::assistant("Sure."));
}

#[tokio::test]
async fn test_slow_first_save_does_not_overwrite_later_one() {
    let store = FlakyStore {
        slow_first_conversation_write: Some(Duration::from_millis(200)),
        ..Default::default()
    };
    let h = harness_with_store(ScriptedModel::new(), MockScraper::default(), store);
    let c = &h.services.conversations;

    let first = c.chat("t1", "first").await.unwrap();
    let second = c.chat("t1", "second").await.unwrap();
    let first_outcome = first.persistence.confirm().await;
    assert_eq!(second.persistence.confirm().await, PersistOutcome::Applied);
    assert!(matches!(
        first_outcome,
        PersistOutcome::Applied | PersistOutcome::Superseded
    ));

    assert_eq!(
        h.store.get_conversation("t1").await.unwrap().unwrap(),
        vec![
            Turn::user("first"),
            Turn::assistant("Sure."),
            Turn::user("second"),
            Turn::assistant("Sure."),
        ]
    );
}

#[tokio::test]
async fn test_rehydrate_with_unreachable_store_starts_fresh() {
    let store = FlakyStore {
        fail_get_conversation: true,
        ..Default::default()
    };
    store
        .inner
        .set_conversation("t1", &[Turn::user("earlier"), Turn::assistant("reply")])
        .await
        .unwrap();
    let h = harness_with_store(ScriptedModel::new(), MockScraper::default(), store);
    let c = &h.services.conversations;

    assert!(matches!(
        c.rehydrate("t1").await,
        RehydrateOutcome::Unavailable(_)
    ));
    assert_eq!(c.state("t1").await, ConversationState::RehydratedEmpty);
    assert_eq!(c.transcript("t1").await, vec![Turn::system(SYSTEM_PROMPT)]);
}

#[tokio::test]
async fn test_failed_save_still_answers() {
    let store = FlakyStore {
        fail_set_conversation: true,
        ..Default::default()
    };
    let h = harness_with_store(ScriptedModel::new(), MockScraper::default(), store);

    let reply = h.services.conversations.chat("t1", "hello").await.unwrap();
    assert_eq!(reply.answer, "Sure.");
    assert!(matches!(
        reply.persistence.confirm().await,
        PersistOutcome::Failed(_)
    ));
    assert!(h.store.get_conversation("t1").await.unwrap().is_none());
    assert_eq!(
        h.services.conversations.transcript("t1").await.len(),
        3
    );
}

#[tokio::test]
async fn test_idle_sessions_are_evicted_and_rehydrate() {
    let h = harness(ScriptedModel::new(), MockScraper::default());
    let c = ConversationManager::new(
        h.store.clone(),
        h.model.clone(),
        h.services.retriever.clone(),
    )
    .with_capacity(2);

    for task in ["a", "b", "c"] {
        let reply = c.chat(task, "hello").await.unwrap();
        assert_eq!(reply.persistence.confirm().await, PersistOutcome::Applied);
    }
    assert_eq!(c.session_count(), 2);

    // "a" was least recently used; it comes back from the store.
    assert_eq!(c.rehydrate("a").await, RehydrateOutcome::Restored(2));
    assert_eq!(c.session_count(), 2);
    assert_eq!(c.state("a").await, ConversationState::Active);
}

#[tokio::test]
async fn test_concurrent_chats_keep_separate_transcripts() {
    let h = harness(ScriptedModel::new(), MockScraper::default());
    let conversations = h.services.conversations.clone();

    let mut handles = Vec::new();
    for task in ["a", "b", "c", "d"] {
        let conversations = conversations.clone();
        handles.push(tokio::spawn(async move {
            for i in 0..3 {
                let reply = conversations
                    .chat(task, &format!("{} question {}", task, i))
                    .await
                    .unwrap();
                reply.persistence.confirm().await;
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    for task in ["a", "b", "c", "d"] {
        let transcript = conversations.transcript(task).await;
        assert_eq!(transcript.len(), 7);
        assert!(transcript
            .iter()
            .filter(|t| t.role == Role::User)
            .all(|t| t.content.starts_with(task)));
    }
}
