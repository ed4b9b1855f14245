//! Event queue, dispatcher and reply pipeline integration tests
//!
//! Everything past the microphone, driven by scripted generators and
//! synthesizers.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::watch;
use uuid::Uuid;

use vesper_agent::agenda::{ActionStatus, DesireBoard, DesireStatus};
use vesper_agent::background::BackgroundUpdaters;
use vesper_agent::context::{Exchange, SharedContext};
use vesper_agent::db::{Memory, MemoryCategory, MemoryRepo};
use vesper_agent::feedback::{Feedback, FeedbackSignal};
use vesper_agent::llm::TextGenerator;
use vesper_agent::memory::MemoryFormer;
use vesper_agent::mood::{LexiconMoodEstimator, MoodState};
use vesper_agent::prompt::Role;
use vesper_agent::speech::clean_for_speech;
use vesper_agent::voice::VoiceParams;
use vesper_agent::{
    Assistant, Dispatcher, Event, EventHandler, EventKind, EventSource, OrderedSpeechSink,
    Priority, PriorityEventQueue, ResponseSegmenter, TurnInput,
};

mod common;

use common::{RecordingFeedback, RecordingHandler, RecordingSynth, ScriptedGenerator, setup_test_db};

fn initiative(desire_id: Uuid) -> Event {
    Event::new(EventKind::Initiative { desire_id }, EventSource::Initiative)
}

fn planned(action_id: Uuid) -> Event {
    Event::new(EventKind::PlannedAction { action_id }, EventSource::Planner)
}

fn background(mood: &Arc<MoodState>) -> BackgroundUpdaters {
    BackgroundUpdaters::new(
        Arc::clone(mood),
        Arc::new(LexiconMoodEstimator::default()),
        None,
        Duration::from_secs(60),
    )
}

struct Harness {
    assistant: Assistant,
    generator: Arc<ScriptedGenerator>,
    synth: Arc<RecordingSynth>,
    context: SharedContext,
    worker: tokio::task::JoinHandle<()>,
}

fn harness(fragments: &[&str]) -> Harness {
    harness_with(ScriptedGenerator::new(fragments))
}

fn harness_with(generator: ScriptedGenerator) -> Harness {
    let generator = Arc::new(generator);
    let synth = Arc::new(RecordingSynth::default());
    let (sink, worker) = OrderedSpeechSink::spawn(synth.clone(), Duration::from_secs(1));
    let mood = Arc::new(MoodState::default());
    let context = SharedContext::new("You are Vesper.", 10, Arc::clone(&mood));

    let assistant = Assistant::new(
        generator.clone(),
        sink,
        VoiceParams::default(),
        context.clone(),
        background(&mood),
    );

    Harness {
        assistant,
        generator,
        synth,
        context,
        worker,
    }
}

#[tokio::test]
async fn test_take_wakes_on_offer_from_thread() {
    let queue = Arc::new(PriorityEventQueue::new(4));

    let producer = Arc::clone(&queue);
    std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(20));
        assert!(producer.offer(Event::wake_word("hello")));
    });

    let event = tokio::time::timeout(Duration::from_secs(2), queue.take())
        .await
        .expect("take should wake");
    assert_eq!(event.priority, Priority::High);
}

#[test]
fn test_take_pending_until_offer() {
    let queue = PriorityEventQueue::new(2);
    let mut take = tokio_test::task::spawn(queue.take());

    tokio_test::assert_pending!(take.poll());
    assert!(queue.offer(Event::wake_word("hi")));
    assert!(take.is_woken());

    let event = tokio_test::assert_ready!(take.poll());
    assert_eq!(event.source, EventSource::Microphone);
}

#[test]
fn test_queue_capacity_across_producers() {
    let queue = Arc::new(PriorityEventQueue::new(16));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let queue = Arc::clone(&queue);
            std::thread::spawn(move || {
                (0..10)
                    .filter(|_| queue.offer(initiative(Uuid::new_v4())))
                    .count()
            })
        })
        .collect();

    let accepted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
    assert_eq!(accepted, 16);
    assert_eq!(queue.len(), 16);
}

#[test]
fn test_priority_derived_from_kind() {
    assert_eq!(Event::wake_word("x").priority, Priority::High);
    assert_eq!(planned(Uuid::new_v4()).priority, Priority::Medium);
    assert_eq!(initiative(Uuid::new_v4()).priority, Priority::Low);
}

#[tokio::test]
async fn test_sink_preserves_order_under_inverse_latency() {
    let synth = Arc::new(
        RecordingSynth::default()
            .with_latency("A", Duration::from_millis(60))
            .with_latency("B", Duration::from_millis(30)),
    );
    let (sink, worker) = OrderedSpeechSink::spawn(synth.clone(), Duration::from_secs(1));

    for text in ["A", "B", "C"] {
        sink.submit(text, VoiceParams::default()).unwrap();
    }
    drop(sink);
    worker.await.unwrap();

    assert_eq!(synth.spoken(), ["A", "B", "C"]);
}

#[tokio::test]
async fn test_sink_abandons_slow_sentence() {
    let synth = Arc::new(RecordingSynth::default().with_latency("slow", Duration::from_secs(5)));
    let (sink, worker) = OrderedSpeechSink::spawn(synth.clone(), Duration::from_millis(50));

    sink.submit("slow", VoiceParams::default()).unwrap();
    sink.submit("fast", VoiceParams::default()).unwrap();
    drop(sink);

    tokio::time::timeout(Duration::from_secs(2), worker)
        .await
        .expect("worker should not wait out the slow sentence")
        .unwrap();
    assert_eq!(synth.spoken(), ["fast"]);
}

#[tokio::test]
async fn test_segmenter_speaks_clean_sentences() {
    let generator = ScriptedGenerator::new(&[
        "Hello **there**. How",
        " are you? See [the docs](docs/readme)",
        ". Bye",
    ]);
    let synth = Arc::new(RecordingSynth::default());
    let (sink, worker) = OrderedSpeechSink::spawn(synth.clone(), Duration::from_secs(1));

    let stream = generator
        .generate_stream(&vesper_agent::prompt::Prompt::default())
        .await
        .unwrap();
    let reply = ResponseSegmenter::new(sink, VoiceParams::default())
        .run(stream)
        .await;

    assert!(reply.error.is_none());
    assert_eq!(
        reply.text,
        "Hello **there**. How are you? See [the docs](docs/readme). Bye"
    );
    worker.await.unwrap();
    assert_eq!(
        synth.spoken(),
        ["Hello there.", "How are you?", "See the docs.", "Bye"]
    );
}

#[tokio::test]
async fn test_segmenter_flushes_partial_reply_on_error() {
    let generator = ScriptedGenerator::new(&["First one. Sec", "ond half"]).failing();
    let synth = Arc::new(RecordingSynth::default());
    let (sink, worker) = OrderedSpeechSink::spawn(synth.clone(), Duration::from_secs(1));

    let stream = generator
        .generate_stream(&vesper_agent::prompt::Prompt::default())
        .await
        .unwrap();
    let reply = ResponseSegmenter::new(sink, VoiceParams::default())
        .run(stream)
        .await;

    assert_eq!(reply.text, "First one. Second half");
    assert!(matches!(reply.error, Some(vesper_agent::Error::Llm(_))));
    worker.await.unwrap();
    assert_eq!(synth.spoken(), ["First one.", "Second half"]);
}

#[tokio::test]
async fn test_segmenter_skips_markup_only_remainder() {
    let stream = futures::stream::iter(["Done. ", "**"].map(|s| Ok(s.to_string()))).boxed();
    let synth = Arc::new(RecordingSynth::default());
    let (sink, worker) = OrderedSpeechSink::spawn(synth.clone(), Duration::from_secs(1));

    let reply = ResponseSegmenter::new(sink, VoiceParams::default())
        .run(stream)
        .await;

    assert_eq!(reply.into_result().unwrap(), "Done. **");
    worker.await.unwrap();
    assert_eq!(synth.spoken(), ["Done."]);
}

#[test]
fn test_clean_for_speech_idempotent() {
    for text in [
        "**bold** and #heading",
        "[a [b](x)](y)",
        "  plain text  ",
        "[[x](y)](z) *",
        "",
    ] {
        let once = clean_for_speech(text);
        assert_eq!(clean_for_speech(&once), once, "not idempotent for {text:?}");
    }
}

#[tokio::test]
async fn test_dispatcher_priority_feedback_and_revert() {
    let queue = Arc::new(PriorityEventQueue::new(8));
    let handler = Arc::new(RecordingHandler::failing(&["initiative"]));
    let feedback = Arc::new(RecordingFeedback::default());

    let desire_id = Uuid::new_v4();
    let action_id = Uuid::new_v4();
    assert!(queue.offer(initiative(desire_id)));
    assert!(queue.offer(planned(action_id)));
    assert!(queue.offer(Event::wake_word("hello")));

    let (tx, rx) = watch::channel(false);
    let feedback_dyn: Arc<dyn Feedback> = feedback.clone();
    let task = tokio::spawn(
        Dispatcher::new(Arc::clone(&queue), handler.clone(), feedback_dyn).run(rx),
    );

    tokio::time::timeout(Duration::from_secs(2), async {
        while handler.handled.lock().unwrap().len() < 3 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(2), task)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(
        *handler.handled.lock().unwrap(),
        [
            "wake_word:hello".to_string(),
            format!("planned_action:{action_id}"),
            format!("initiative:{desire_id}"),
        ]
    );
    assert_eq!(*handler.reverted.lock().unwrap(), [desire_id]);
    assert_eq!(
        feedback.signals(),
        [
            FeedbackSignal::TaskStarted {
                kind: "planned_action"
            },
            FeedbackSignal::TaskEnded {
                kind: "planned_action",
                ok: true
            },
            FeedbackSignal::TaskStarted { kind: "initiative" },
            FeedbackSignal::TaskEnded {
                kind: "initiative",
                ok: false
            },
        ]
    );
}

#[tokio::test]
async fn test_wake_word_failure_is_not_reverted() {
    let handler = Arc::new(RecordingHandler::failing(&["wake_word"]));
    let feedback = Arc::new(RecordingFeedback::default());
    let dispatcher = Dispatcher::new(
        Arc::new(PriorityEventQueue::new(1)),
        handler.clone(),
        feedback.clone(),
    );

    dispatcher.dispatch(Event::wake_word("hi")).await;

    assert!(handler.reverted.lock().unwrap().is_empty());
    assert!(feedback.signals().is_empty());
}

#[tokio::test]
async fn test_assistant_turn() {
    let h = harness(&["It is nine. ", "Have a good day!"]);

    let repo = MemoryRepo::new(setup_test_db());
    repo.add(&Memory::new(MemoryCategory::Fact, "User's name is Sam"))
        .unwrap();
    let assistant = h.assistant.with_memories(repo, 5);

    let reply = assistant
        .run_turn(TurnInput::User("what time is it".to_string()))
        .await
        .unwrap();
    assert_eq!(reply, "It is nine. Have a good day!");

    let snapshot = h.context.snapshot();
    assert_eq!(snapshot.history.len(), 2);
    assert_eq!(snapshot.history[0].role, Role::User);
    assert_eq!(snapshot.history[1].content, reply);

    let prompts = h.generator.prompts();
    assert_eq!(prompts.len(), 1);
    assert!(prompts[0].system.contains("You are Vesper."));
    assert!(prompts[0].system.contains("User's name is Sam"));
    let last = prompts[0].messages.last().unwrap();
    assert_eq!(last.role, Role::User);
    assert_eq!(last.content, "what time is it");

    drop(assistant);
    h.worker.await.unwrap();
    assert_eq!(h.synth.spoken(), ["It is nine.", "Have a good day!"]);
}

#[tokio::test]
async fn test_second_turn_sees_first() {
    let h = harness(&["Sure."]);

    for input in ["one", "two"] {
        h.assistant
            .run_turn(TurnInput::User(input.to_string()))
            .await
            .unwrap();
    }

    let prompts = h.generator.prompts();
    let contents: Vec<&str> = prompts[1].messages.iter().map(|m| m.content.as_str()).collect();
    assert_eq!(contents, ["one", "Sure.", "two"]);
}

#[tokio::test]
async fn test_wake_word_schedules_reminder() {
    let h = harness(&["Okay."]);

    h.assistant
        .on_wake_word("remind me in 10 minutes to stretch")
        .await
        .unwrap();

    let upcoming = h.assistant.planner().upcoming();
    assert_eq!(upcoming.len(), 1);
    assert_eq!(upcoming[0].description, "stretch");
    assert_eq!(upcoming[0].status, ActionStatus::Scheduled);
    assert_eq!(h.generator.prompts().len(), 1);
}

#[tokio::test]
async fn test_initiative_fulfils_desire() {
    let h = harness(&["Fancy a walk?"]);
    let desires = Arc::new(DesireBoard::new());
    let id = desires.add("suggest a walk", 0.8);
    let assistant = h.assistant.with_agenda(
        Arc::clone(&desires),
        Arc::new(vesper_agent::agenda::ActionPlanner::new()),
        None,
    );

    desires.activate_strongest().unwrap();
    assistant.on_initiative(id).await.unwrap();

    assert_eq!(desires.get(id).unwrap().status, DesireStatus::Fulfilled);
    assert!(h.generator.prompts()[0].messages[0].content.contains("suggest a walk"));
}

#[tokio::test]
async fn test_initiative_recorded_as_system_note() {
    let h = harness(&["Fancy a walk?"]);
    let id = h.assistant.desires().add("suggest a walk", 0.8);
    h.assistant.desires().activate_strongest().unwrap();

    h.assistant.on_initiative(id).await.unwrap();

    let history = h.context.snapshot().history;
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].role, Role::System);
    assert!(history[0].content.contains("suggest a walk"));
    assert_eq!(history[1].role, Role::Assistant);
    assert_eq!(history[1].content, "Fancy a walk?");
}

#[tokio::test]
async fn test_failed_initiative_reverts_desire() {
    let h = harness_with(ScriptedGenerator::new(&[]).failing());
    let id = h.assistant.desires().add("suggest a walk", 0.8);
    h.assistant.desires().activate_strongest().unwrap();
    let desires = Arc::clone(h.assistant.desires());

    let feedback = Arc::new(RecordingFeedback::default());
    let dispatcher = Dispatcher::new(
        Arc::new(PriorityEventQueue::new(1)),
        Arc::new(h.assistant),
        feedback.clone(),
    );
    dispatcher.dispatch(initiative(id)).await;

    assert_eq!(desires.get(id).unwrap().status, DesireStatus::Pending);
    assert!(h.context.is_empty());
    assert_eq!(
        feedback.signals().last(),
        Some(&FeedbackSignal::TaskEnded {
            kind: "initiative",
            ok: false
        })
    );
}

#[tokio::test]
async fn test_failed_reminder_stays_scheduled() {
    let h = harness_with(ScriptedGenerator::new(&["Time to"]).failing());
    let action = h
        .assistant
        .planner()
        .schedule("water plants", chrono::Utc::now());
    assert_eq!(h.assistant.planner().take_due(chrono::Utc::now()).len(), 1);
    let planner = Arc::clone(h.assistant.planner());

    let dispatcher = Dispatcher::new(
        Arc::new(PriorityEventQueue::new(1)),
        Arc::new(h.assistant),
        Arc::new(RecordingFeedback::default()),
    );
    dispatcher.dispatch(planned(action)).await;

    assert_eq!(planner.get(action).unwrap().status, ActionStatus::Scheduled);
    assert!(h.context.is_empty());
}

#[tokio::test]
async fn test_user_turn_keeps_partial_reply() {
    let h = harness_with(ScriptedGenerator::new(&["Half a thought. And"]).failing());

    let reply = h
        .assistant
        .run_turn(TurnInput::User("tell me".to_string()))
        .await
        .unwrap();

    assert_eq!(reply, "Half a thought. And");
    let history = h.context.snapshot().history;
    assert_eq!(history.len(), 2);
    assert_eq!(history[1].content, reply);
}

#[tokio::test]
async fn test_revert_restores_agenda() {
    let h = harness(&[]);
    let desire = h.assistant.desires().add("ask about the trip", 0.5);
    let action = h
        .assistant
        .planner()
        .schedule("water plants", chrono::Utc::now());

    h.assistant.desires().activate_strongest().unwrap();
    assert_eq!(h.assistant.planner().take_due(chrono::Utc::now()).len(), 1);

    h.assistant.revert(&initiative(desire));
    h.assistant.revert(&planned(action));

    assert_eq!(
        h.assistant.desires().get(desire).unwrap().status,
        DesireStatus::Pending
    );
    assert_eq!(
        h.assistant.planner().get(action).unwrap().status,
        ActionStatus::Scheduled
    );
}

#[tokio::test]
async fn test_unknown_desire_fails() {
    let h = harness(&["Hi."]);
    assert!(h.assistant.on_initiative(Uuid::new_v4()).await.is_err());
    assert!(h.generator.prompts().is_empty());
}

#[tokio::test]
async fn test_memory_former_stores_new_facts() {
    let generator = Arc::new(ScriptedGenerator::new(&[
        "```json\n{\"facts\": [",
        "{\"content\": \"User's name is Sam\", \"category\": \"fact\", \"tags\": [\"name\"]},",
        "{\"content\": \"Prefers metric units\", \"category\": \"preference\"}",
        "]}\n```",
    ]));
    let repo = MemoryRepo::new(setup_test_db());
    let former = MemoryFormer::new(generator.clone(), repo.clone());

    let exchange = Exchange {
        user: "I'm Sam, and please use metric".to_string(),
        reply: "Got it, Sam.".to_string(),
    };

    let formed = former.form(&exchange).await.unwrap();
    assert_eq!(formed.len(), 2);
    assert_eq!(formed[0].category, MemoryCategory::Fact);
    assert_eq!(formed[0].tags, ["name"]);
    assert_eq!(repo.count().unwrap(), 2);

    // Same facts again are not duplicated
    assert!(former.form(&exchange).await.unwrap().is_empty());
    assert_eq!(repo.count().unwrap(), 2);

    let prompt = &generator.prompts()[0];
    assert!(prompt.messages[0].content.contains("I'm Sam"));
}

#[tokio::test]
async fn test_memory_formation_debounced() {
    let generator = Arc::new(ScriptedGenerator::new(&["{\"facts\": []}"]));
    let repo = MemoryRepo::new(setup_test_db());
    let mood = Arc::new(MoodState::default());
    let updaters = BackgroundUpdaters::new(
        Arc::clone(&mood),
        Arc::new(LexiconMoodEstimator::default()),
        Some(Arc::new(MemoryFormer::new(generator.clone(), repo))),
        Duration::from_secs(60),
    );

    let exchange = || Exchange {
        user: "hi".to_string(),
        reply: "hello".to_string(),
    };

    let first = updaters.turn_completed(exchange());
    let second = updaters.turn_completed(exchange());
    assert_eq!(first.len(), 2);
    assert_eq!(second.len(), 1);

    for task in first.into_iter().chain(second) {
        task.await.unwrap();
    }
    assert_eq!(generator.prompts().len(), 1);
}
