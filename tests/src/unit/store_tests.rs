use super::{harness, harness_with_token, reply, user};
use chatline_core::auth::{SessionEvent, SignOutReason};
use chatline_core::fake::Injected;
use chatline_core::model::{Delivery, MessageRole};
use chatline_core::state::{NoticeLevel, StoreEvent, SyncPhase};
use chatline_core::{Method, ScriptedReply};
use std::time::Duration;

fn notices(events: &[StoreEvent]) -> Vec<(NoticeLevel, String)> {
    events
        .iter()
        .filter_map(|event| match event {
            StoreEvent::Notice(notice) => Some((notice.level, notice.text.clone())),
            _ => None,
        })
        .collect()
}

#[test]
fn new_conversation_adopts_server_thread_and_refreshes_list() {
    let h = harness();

    let created = h
        .run(h.store.send_message("  Plan a weekend trip  "))
        .expect("new thread id");

    let chat = h.store.current_chat();
    assert_eq!(chat.thread_id.as_deref(), Some(created.as_str()));
    assert_eq!(chat.messages.len(), 1);
    assert!(!chat.messages[0].is_temporary());
    assert_eq!(chat.messages[0].id, h.backend.messages(&created)[0].id);
    assert_eq!(chat.messages[0].content.as_text(), Some("Plan a weekend trip"));
    assert!(chat.waiting_for_response);
    assert_eq!(h.store.phase(), SyncPhase::Polling);
    assert_eq!(h.store.polling_thread().as_deref(), Some(created.as_str()));

    let threads = h.store.threads();
    assert_eq!(threads[0].id, created);
    assert_eq!(threads[0].title, "Plan a weekend trip");
    assert_eq!(h.backend.count(Method::Post, "/chat"), 1);
}

#[test]
fn confirmed_message_replaces_its_optimistic_copy() {
    let mut h = harness();
    h.backend
        .seed_thread("t-1", "Groceries", vec![user("u-1", "milk?")]);
    h.run(h.store.load_chat("t-1"));
    h.drain_events();

    assert_eq!(h.run(h.store.send_message("and eggs")), None);

    let chat = h.store.current_chat();
    let server = h.backend.messages("t-1");
    assert_eq!(chat.messages.len(), 2);
    assert_eq!(chat.messages[1].id, server[1].id);
    assert_eq!(chat.messages[1].delivery, Delivery::Confirmed);
    assert!(chat.messages.iter().all(|m| !m.is_temporary()));

    // The optimistic copy was published before the write completed.
    let events = h.drain_events();
    assert!(events.iter().filter(|e| **e == StoreEvent::ChatChanged).count() >= 2);
}

#[test]
fn polling_stops_when_reply_is_complete() {
    let mut h = harness();
    h.backend.script_reply(ScriptedReply::after_polls(
        3,
        vec![reply("a-1", "first"), reply("a-2", "second")],
    ));

    let thread_id = h.run(h.store.send_message("question")).expect("created");
    let list_loads = h.backend.count(Method::Get, "/threads");

    assert_eq!(h.wait_for_response(), thread_id);

    let chat = h.store.current_chat();
    let user_id = chat.messages[0].id.clone();
    let ids: Vec<&str> = chat.messages.iter().map(|m| m.id.as_str()).collect();
    assert_eq!(ids, [user_id.as_str(), "a-1", "a-2"]);
    assert!(!chat.waiting_for_response);
    assert_eq!(h.store.phase(), SyncPhase::Idle);
    assert_eq!(h.store.polling_thread(), None);

    let poll_path = format!("/chat/{thread_id}/poll");
    assert_eq!(h.backend.count(Method::Get, &poll_path), 4);
    assert_eq!(h.backend.count(Method::Get, "/threads"), list_loads + 1);
    let expected_query = format!("since_id={user_id}");
    assert!(h
        .backend
        .calls()
        .iter()
        .filter(|call| call.path == poll_path)
        .all(|call| call.query.as_deref() == Some(expected_query.as_str())));

    // No further requests once finished.
    h.advance(Duration::from_secs(30));
    assert_eq!(h.backend.count(Method::Get, &poll_path), 4);
}

#[test]
fn blank_send_changes_nothing() {
    let mut h = harness();
    h.drain_events();

    assert_eq!(h.run(h.store.send_message("   \n\t")), None);

    assert!(h.store.current_chat().messages.is_empty());
    assert!(h.backend.calls().is_empty());
    assert!(h.drain_events().is_empty());
}

#[test]
fn opening_another_thread_stops_the_previous_poll() {
    let h = harness();
    h.backend.seed_thread("t-1", "Busy", vec![user("u-1", "long task")]);
    h.backend.seed_thread("t-2", "Quiet", vec![user("u-2", "hello")]);
    h.backend
        .seed_pending("t-1", ScriptedReply::after_polls(1000, Vec::new()));

    h.run(h.store.load_chat("t-1"));
    assert_eq!(h.store.polling_thread().as_deref(), Some("t-1"));
    h.advance(Duration::from_secs(5));
    assert!(h.backend.count(Method::Get, "/chat/t-1/poll") > 0);

    h.run(h.store.load_chat("t-2"));
    assert_eq!(h.store.polling_thread(), None);
    let polls = h.backend.count(Method::Get, "/chat/t-1/poll");
    h.advance(Duration::from_secs(30));

    assert_eq!(h.backend.count(Method::Get, "/chat/t-1/poll"), polls);
    assert_eq!(h.backend.count(Method::Get, "/chat/t-2/poll"), 0);
    let chat = h.store.current_chat();
    assert_eq!(chat.thread_id.as_deref(), Some("t-2"));
    assert!(!chat.waiting_for_response);
}

#[test]
fn slow_load_of_a_superseded_thread_is_discarded() {
    let h = harness();
    h.backend.seed_thread("t-1", "Slow", vec![user("u-1", "one")]);
    h.backend.seed_thread("t-2", "Fast", vec![user("u-2", "two")]);
    h.backend
        .inject(Method::Get, "/chat/t-1", Injected::Delay(Duration::from_secs(10)));

    h.run(async {
        let store = h.store.clone();
        let slow = tokio::spawn(async move { store.load_chat("t-1").await });
        tokio::task::yield_now().await;
        h.store.load_chat("t-2").await;
        slow.await.expect("slow load task");
    });

    let chat = h.store.current_chat();
    assert_eq!(chat.thread_id.as_deref(), Some("t-2"));
    assert_eq!(chat.messages.len(), 1);
    assert_eq!(chat.messages[0].content.as_text(), Some("two"));
    assert_eq!(h.store.phase(), SyncPhase::Idle);
}

#[test]
fn streamed_chunks_build_one_message() {
    let mut h = harness();
    h.backend.seed_thread("t-1", "Stream", vec![user("u-1", "hi")]);
    h.backend
        .seed_pending("t-1", ScriptedReply::streamed("a-9", &["Hel", "lo ", "there"]));

    h.run(h.store.load_chat("t-1"));
    assert!(h.store.current_chat().waiting_for_response);
    assert_eq!(h.wait_for_response(), "t-1");

    let chat = h.store.current_chat();
    assert_eq!(chat.messages.len(), 2);
    assert_eq!(chat.messages[1].id, "a-9");
    assert_eq!(chat.messages[1].role, MessageRole::Assistant);
    assert_eq!(chat.messages[1].content.as_text(), Some("Hello there"));
}

#[test]
fn rename_failure_restores_previous_title() {
    let mut h = harness();
    h.backend.seed_thread("t-1", "Original", Vec::new());
    h.run(h.store.load_all_threads());

    h.backend.fail_next(Method::Patch, "/chat/t-1/rename", 500);
    h.run(h.store.rename_thread("t-1", "Better"));
    assert_eq!(h.store.threads()[0].title, "Original");
    let reported = notices(&h.drain_events());
    assert_eq!(reported.len(), 1);
    assert_eq!(reported[0].0, NoticeLevel::Error);
    assert!(reported[0].1.starts_with("Could not rename conversation"));

    h.run(h.store.rename_thread("t-1", "  Better  "));
    assert_eq!(h.store.threads()[0].title, "Better");
    assert_eq!(h.backend.threads()[0].title, "Better");

    h.run(h.store.rename_thread("t-1", "   "));
    assert_eq!(h.store.threads()[0].title, "Better");
    assert_eq!(h.backend.count(Method::Patch, "/chat/t-1/rename"), 2);
}

#[test]
fn delete_failure_resyncs_thread_list() {
    let mut h = harness();
    h.backend.seed_thread("t-1", "Keep me", Vec::new());
    h.backend.seed_thread("t-2", "Other", Vec::new());
    h.run(h.store.load_all_threads());

    h.backend.fail_next(Method::Delete, "/chat/t-1", 500);
    h.run(h.store.delete_thread("t-1"));

    let ids = |threads: Vec<chatline_core::Thread>| -> Vec<String> {
        threads.into_iter().map(|t| t.id).collect()
    };
    assert_eq!(ids(h.store.threads()), ids(h.backend.threads()));
    assert!(h.store.threads().iter().any(|t| t.id == "t-1"));
    assert_eq!(notices(&h.drain_events()).len(), 1);
}

#[test]
fn deleting_the_open_thread_resets_the_session() {
    let h = harness();
    h.backend.seed_thread("t-1", "Doomed", vec![user("u-1", "bye")]);
    h.backend
        .seed_pending("t-1", ScriptedReply::after_polls(1000, Vec::new()));
    h.run(h.store.load_all_threads());
    h.run(h.store.load_chat("t-1"));
    assert!(h.store.polling_thread().is_some());

    h.run(h.store.delete_thread("t-1"));

    let chat = h.store.current_chat();
    assert_eq!(chat.thread_id, None);
    assert!(chat.messages.is_empty());
    assert_eq!(h.store.polling_thread(), None);
    assert!(h.store.threads().is_empty());
    assert!(h.backend.threads().is_empty());
}

#[test]
fn failed_send_is_kept_and_can_be_retried() {
    let mut h = harness();
    h.backend.seed_thread("t-1", "Flaky", Vec::new());
    h.run(h.store.load_chat("t-1"));
    h.drain_events();

    h.backend.fail_next(Method::Post, "/chat/t-1", 503);
    assert_eq!(h.run(h.store.send_message("hello?")), None);

    let chat = h.store.current_chat();
    assert_eq!(chat.messages.len(), 1);
    let failed = chat.messages[0].clone();
    assert!(failed.is_temporary());
    assert_eq!(failed.delivery, Delivery::Failed);
    assert!(!chat.waiting_for_response);
    assert_eq!(h.store.phase(), SyncPhase::Idle);
    assert_eq!(h.store.polling_thread(), None);
    let reported = notices(&h.drain_events());
    assert_eq!(
        reported,
        [(
            NoticeLevel::Error,
            "Message was not sent: injected failure for /chat/t-1".to_string()
        )]
    );

    assert_eq!(h.run(h.store.retry_message(&failed.id)), None);
    let chat = h.store.current_chat();
    assert_eq!(chat.messages.len(), 1);
    assert_eq!(chat.messages[0].delivery, Delivery::Confirmed);
    assert_eq!(chat.messages[0].id, h.backend.messages("t-1")[0].id);

    h.wait_for_response();
    let chat = h.store.current_chat();
    assert_eq!(chat.messages.len(), 2);
    assert_eq!(
        chat.messages[1].content.as_text(),
        Some("[Mock] received 'hello?'.")
    );
}

#[test]
fn failed_message_can_be_discarded() {
    let h = harness();
    h.backend.seed_thread("t-1", "Flaky", Vec::new());
    h.run(h.store.load_chat("t-1"));
    h.backend.fail_next(Method::Post, "/chat/t-1", 500);
    h.run(h.store.send_message("lost"));
    let failed_id = h.store.current_chat().messages[0].id.clone();

    assert!(h.store.discard_failed(&failed_id));
    assert!(!h.store.discard_failed(&failed_id));
    assert!(h.store.current_chat().messages.is_empty());
}

#[test]
fn send_is_ignored_while_another_is_unconfirmed() {
    let h = harness();
    h.backend.seed_thread("t-1", "Busy", Vec::new());
    h.run(h.store.load_chat("t-1"));
    h.backend
        .inject(Method::Post, "/chat/t-1", Injected::Delay(Duration::from_secs(2)));

    h.run(async {
        let store = h.store.clone();
        let first = tokio::spawn(async move { store.send_message("first").await });
        tokio::task::yield_now().await;
        assert_eq!(h.store.phase(), SyncPhase::Sending);
        assert_eq!(h.store.send_message("second").await, None);
        first.await.expect("first send task");
    });

    let chat = h.store.current_chat();
    assert_eq!(chat.messages.len(), 1);
    assert_eq!(chat.messages[0].content.as_text(), Some("first"));
    assert_eq!(h.backend.messages("t-1").len(), 1);
}

#[test]
fn cancel_clears_waiting_and_notifies_server() {
    let h = harness();
    h.backend.seed_thread("t-1", "Long", vec![user("u-1", "essay please")]);
    h.backend
        .seed_pending("t-1", ScriptedReply::after_polls(1000, Vec::new()));
    h.run(h.store.load_chat("t-1"));
    assert!(h.store.current_chat().waiting_for_response);

    h.run(h.store.cancel_request());

    assert!(!h.store.current_chat().waiting_for_response);
    assert_eq!(h.store.polling_thread(), None);
    assert_eq!(h.store.phase(), SyncPhase::Idle);
    assert_eq!(h.backend.count(Method::Post, "/chat/t-1/cancel"), 1);
    assert!(!h.backend.is_generating("t-1"));
}

#[test]
fn failed_cancel_is_not_surfaced() {
    let mut h = harness();
    h.backend.seed_thread("t-1", "Long", vec![user("u-1", "essay please")]);
    h.backend
        .seed_pending("t-1", ScriptedReply::after_polls(1000, Vec::new()));
    h.run(h.store.load_chat("t-1"));
    h.drain_events();

    h.backend.fail_next(Method::Post, "/chat/t-1/cancel", 500);
    h.run(h.store.cancel_request());

    assert!(!h.store.current_chat().waiting_for_response);
    assert!(notices(&h.drain_events()).is_empty());
}

#[test]
fn global_context_save_and_reload() {
    let mut h = harness();

    assert!(h.run(h.store.save_global_context("Answer briefly.")));
    assert_eq!(h.backend.global_context(), "Answer briefly.");
    assert_eq!(h.store.global_context(), "Answer briefly.");
    assert_eq!(
        notices(&h.drain_events()),
        [(NoticeLevel::Info, "Global context saved".to_string())]
    );

    h.backend.fail_next(Method::Post, "/global-context", 500);
    assert!(!h.run(h.store.save_global_context("Ignored")));
    assert_eq!(h.store.global_context(), "Answer briefly.");

    h.run(h.store.load_global_context());
    assert_eq!(h.store.global_context(), "Answer briefly.");
}

#[test]
fn rejected_credential_signs_the_session_out() {
    let mut h = harness_with_token(Some("stale"));
    h.backend.require_token("fresh");

    h.run(h.store.load_all_threads());

    assert!(h.store.threads().is_empty());
    assert_eq!(
        h.session_events.try_recv().ok(),
        Some(SessionEvent::SignedOut {
            reason: SignOutReason::Rejected { status: 401 }
        })
    );
    assert!(!h.session.is_signed_in());
    assert_eq!(notices(&h.drain_events()).len(), 1);

    h.run(h.store.load_all_threads());
    let last = h.backend.calls().pop().expect("second request");
    assert_eq!(last.bearer, None);
}

#[test]
fn unreachable_server_signs_the_session_out() {
    let mut h = harness_with_token(Some("token"));
    h.backend.seed_thread("t-1", "Hidden", Vec::new());
    h.backend
        .inject(Method::Get, "/threads", Injected::Unreachable);

    h.run(h.store.load_all_threads());

    assert!(h.store.threads().is_empty());
    assert_eq!(
        h.session_events.try_recv().ok(),
        Some(SessionEvent::SignedOut {
            reason: SignOutReason::Unreachable
        })
    );
    assert_eq!(h.backend.calls()[0].bearer.as_deref(), Some("token"));
}

#[test]
fn sending_replaces_the_running_poll() {
    let mut h = harness();
    h.backend.seed_thread("t-1", "Busy", vec![user("u-1", "first")]);
    h.backend
        .seed_pending("t-1", ScriptedReply::after_polls(1000, Vec::new()));
    h.run(h.store.load_chat("t-1"));
    h.advance(Duration::from_secs(3));

    h.run(h.store.send_message("second"));
    assert_eq!(h.store.polling_thread().as_deref(), Some("t-1"));
    assert_eq!(h.wait_for_response(), "t-1");

    let polls = h.backend.count(Method::Get, "/chat/t-1/poll");
    h.advance(Duration::from_secs(30));
    assert_eq!(h.backend.count(Method::Get, "/chat/t-1/poll"), polls);
    assert_eq!(h.store.polling_thread(), None);
    assert_eq!(h.store.current_chat().messages.len(), 3);
}

#[test]
fn rename_acknowledged_without_content_keeps_new_title() {
    let mut h = harness();
    h.backend.seed_thread("t-1", "Original", Vec::new());
    h.run(h.store.load_all_threads());

    h.backend
        .inject(Method::Patch, "/chat/t-1/rename", Injected::Status(204));
    h.run(h.store.rename_thread("t-1", "Better"));

    assert_eq!(h.store.threads()[0].title, "Better");
    assert!(notices(&h.drain_events()).is_empty());
}

#[test]
fn delete_acknowledged_without_content_does_not_resync() {
    let h = harness();
    h.backend.seed_thread("t-1", "Gone", Vec::new());
    h.run(h.store.load_all_threads());
    let list_loads = h.backend.count(Method::Get, "/threads");

    h.backend
        .inject(Method::Delete, "/chat/t-1", Injected::Status(204));
    h.run(h.store.delete_thread("t-1"));

    assert!(h.store.threads().is_empty());
    assert_eq!(h.backend.count(Method::Get, "/threads"), list_loads);
}

#[test]
fn cancel_during_send_is_not_undone_by_confirmation() {
    let h = harness();
    h.backend.seed_thread("t-1", "Quick", Vec::new());
    h.run(h.store.load_chat("t-1"));
    h.backend
        .inject(Method::Post, "/chat/t-1", Injected::Delay(Duration::from_secs(2)));

    h.run(async {
        let store = h.store.clone();
        let send = tokio::spawn(async move { store.send_message("first").await });
        tokio::task::yield_now().await;
        h.store.cancel_request().await;
        assert!(!h.store.current_chat().waiting_for_response);
        assert_eq!(h.store.phase(), SyncPhase::Idle);
        send.await.expect("send task");
    });

    let chat = h.store.current_chat();
    assert!(!chat.waiting_for_response);
    assert_eq!(h.store.phase(), SyncPhase::Idle);
    assert_eq!(h.store.polling_thread(), None);
    assert_eq!(chat.messages.len(), 1);
    assert!(!chat.messages[0].is_temporary());
    assert_eq!(chat.messages[0].delivery, Delivery::Confirmed);
    // Once before the write landed and once after it.
    assert_eq!(h.backend.count(Method::Post, "/chat/t-1/cancel"), 2);
    assert!(!h.backend.is_generating("t-1"));

    h.advance(Duration::from_secs(30));
    assert_eq!(h.backend.count(Method::Get, "/chat/t-1/poll"), 0);
}

#[test]
fn cancel_during_load_skips_polling() {
    let h = harness();
    h.backend.seed_thread("t-1", "Long", vec![user("u-1", "essay please")]);
    h.backend
        .seed_pending("t-1", ScriptedReply::after_polls(1000, Vec::new()));
    h.backend
        .inject(Method::Get, "/chat/t-1", Injected::Delay(Duration::from_secs(2)));
    // The server keeps generating, so only the local cancel stops the poll.
    h.backend.fail_next(Method::Post, "/chat/t-1/cancel", 500);

    h.run(async {
        let store = h.store.clone();
        let load = tokio::spawn(async move { store.load_chat("t-1").await });
        tokio::task::yield_now().await;
        h.store.cancel_request().await;
        load.await.expect("load task");
    });

    let chat = h.store.current_chat();
    assert_eq!(chat.messages.len(), 1);
    assert!(!chat.waiting_for_response);
    assert_eq!(h.store.polling_thread(), None);
}

#[test]
fn new_thread_confirmed_after_reset_only_refreshes_list() {
    let h = harness();
    h.backend
        .inject(Method::Post, "/chat", Injected::Delay(Duration::from_secs(2)));

    let created = h.run(async {
        let store = h.store.clone();
        let send = tokio::spawn(async move { store.send_message("hello").await });
        tokio::task::yield_now().await;
        h.store.clear_current_chat();
        send.await.expect("send task")
    });

    let created = created.expect("thread created on the server");
    let chat = h.store.current_chat();
    assert!(chat.messages.is_empty());
    assert_eq!(chat.thread_id, None);
    assert!(!chat.waiting_for_response);
    assert_eq!(h.store.polling_thread(), None);
    let threads = h.store.threads();
    assert_eq!(threads.len(), 1);
    assert_eq!(threads[0].id, created);
}
