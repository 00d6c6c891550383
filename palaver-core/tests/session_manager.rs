mod common;

use std::sync::Arc;
use std::time::Duration;

use common::*;
use palaver_core::{Language, MemorySink, PalaverError, Speaker, TurnPhase};

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn sessions_do_not_share_state() {
    let stt = Arc::new(ScriptedStt::saying("only in a"));
    let llm = Arc::new(ScriptedLlm::replying("reply for a"));
    let tts = Arc::new(ScriptedTts::new(2, FRAME_MS));
    let sink = Arc::new(MemorySink::new());
    let manager = manager(test_config(), providers(&stt, &llm, &tts), &sink);

    let mut a = manager.open("a", Language::English).expect("open a");
    let mut b = manager.open("b", Language::Spanish).expect("open b");
    assert_eq!(manager.len(), 2);

    speak(&a.frames_in, 300).await;
    pause(&a.frames_in, 300).await;
    recv_frame(&mut a.frames_out).await;
    wait_for(&mut a.events, is_turn_finished).await;

    let transcript_a = manager.transcript("a").expect("a open");
    assert_eq!(transcript_a.len(), 2);
    assert_eq!(transcript_a.entries()[0].speaker, Speaker::User);
    assert!(manager.transcript("b").expect("b open").is_empty());
    assert_eq!(manager.phase("b"), Some(TurnPhase::Idle));
    assert!(b.frames_out.try_recv().is_err());
    assert!(b.events.try_recv().is_err());

    let records = sink.records();
    assert!(records.iter().all(|r| r.session_id == "a"));

    manager.close("a").await.expect("close a");
    assert_eq!(manager.len(), 1);
    assert!(manager.phase("a").is_none());
    manager.close("b").await.expect("close b");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn close_during_generation_discards_the_turn() {
    let stt = Arc::new(ScriptedStt::saying("long question"));
    let llm = Arc::new(ScriptedLlm::new(vec![Reply::Hang]));
    let tts = Arc::new(ScriptedTts::new(2, FRAME_MS));
    let sink = Arc::new(MemorySink::new());
    let manager = manager(test_config(), providers(&stt, &llm, &tts), &sink);
    let mut handle = manager.open("gone", Language::English).expect("open");

    speak(&handle.frames_in, 300).await;
    pause(&handle.frames_in, 300).await;
    wait_for(&mut handle.events, is_phase(TurnPhase::Generating)).await;

    manager.close("gone").await.expect("close");
    assert!(manager.is_empty());
    assert!(manager.transcript("gone").is_none());

    // The hung provider call is told to stop.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(
        llm.cancellations_seen.load(std::sync::atomic::Ordering::SeqCst),
        1
    );
    // Nothing more reaches the transport and the output side closes.
    assert!(matches!(
        tokio::time::timeout(WAIT, handle.frames_out.recv()).await,
        Ok(None)
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn an_id_can_be_reused_after_close() {
    let stt = Arc::new(ScriptedStt::saying("hi"));
    let llm = Arc::new(ScriptedLlm::replying("hello"));
    let tts = Arc::new(ScriptedTts::new(1, FRAME_MS));
    let sink = Arc::new(MemorySink::new());
    let manager = manager(test_config(), providers(&stt, &llm, &tts), &sink);

    let _first = manager.open("desk", Language::English).expect("open");
    assert!(matches!(
        manager.open("desk", Language::English),
        Err(PalaverError::SessionExists(_))
    ));
    manager.close("desk").await.expect("close");

    let _second = manager.open("desk", Language::Spanish).expect("reopen");
    assert_eq!(manager.phase("desk"), Some(TurnPhase::Idle));
    manager.shutdown().await;
    assert!(manager.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn dropped_output_is_fatal_for_the_session() {
    let stt = Arc::new(ScriptedStt::saying("hi"));
    let llm = Arc::new(ScriptedLlm::replying("hello"));
    let tts = Arc::new(ScriptedTts::new(3, FRAME_MS));
    let sink = Arc::new(MemorySink::new());
    let manager = manager(test_config(), providers(&stt, &llm, &tts), &sink);
    let handle = manager.open("lost", Language::English).expect("open");
    let frames_in = handle.frames_in;
    drop(handle.frames_out);

    // Exactly the trailing silence, so the last frame seals the utterance.
    speak(&frames_in, 300).await;
    pause(&frames_in, 200).await;

    let outcome = manager.wait("lost").await;
    assert!(matches!(outcome, Err(PalaverError::TransportClosed(id)) if id == "lost"));
}
