use std::{sync::Arc, time::Duration};

use live_quiz_back::{
    config::AppConfig,
    dao::{
        durable_store::memory::MemoryDurableStore,
        fast_store::memory::MemoryFastStore,
        models::{
            ANSWERS_COLLECTION, ExamMode, FfiSettings, OptionEntity, ParticipantStatus,
            QuestionEntity, QuizEntity, QuizType, SESSIONS_COLLECTION, WriteOperation,
        },
    },
    dto::{
        session::{CreateSessionRequest, JoinRequest, SubmitAnswerRequest},
        sse::ServerEvent,
    },
    error::ServiceError,
    services::{
        audit::{AuditEvent, MemoryAuditSink},
        broadcast::{self, BroadcastOutcome},
        fallback_service, session_service, sse_service,
    },
    state::{
        AppState, SharedState, channels::Channel, quiz::MemoryQuizCatalog,
        state_machine::SessionPhase,
    },
};
use serde_json::Value;
use tokio::sync::broadcast::Receiver;
use uuid::Uuid;

struct Engine {
    state: SharedState,
    durable: MemoryDurableStore,
    audit: Arc<MemoryAuditSink>,
    quiz: QuizEntity,
}

fn option(id: &str, is_correct: bool) -> OptionEntity {
    OptionEntity {
        id: id.into(),
        text: id.to_uppercase(),
        is_correct,
    }
}

fn question(options: Vec<OptionEntity>) -> QuestionEntity {
    QuestionEntity {
        id: Uuid::new_v4(),
        text: "question".into(),
        options,
        accepted_answers: Vec::new(),
        base_points: 100,
        speed_bonus_multiplier: 0.0,
        partial_credit: false,
        time_limit_secs: 30,
        shuffle_options: false,
    }
}

fn quiz(questions: Vec<QuestionEntity>) -> QuizEntity {
    QuizEntity {
        id: Uuid::new_v4(),
        title: "General knowledge".into(),
        quiz_type: QuizType::Standard,
        ffi: None,
        questions,
    }
}

async fn engine(quiz: QuizEntity) -> Engine {
    let catalog = Arc::new(MemoryQuizCatalog::new());
    catalog.insert(quiz.clone());
    let audit = Arc::new(MemoryAuditSink::new());
    let state = AppState::with_collaborators(
        AppConfig::default(),
        Arc::new(MemoryFastStore::new()),
        catalog,
        audit.clone(),
    );
    let durable = MemoryDurableStore::new();
    state.guard().install_durable(Arc::new(durable.clone())).await;
    Engine {
        state,
        durable,
        audit,
        quiz,
    }
}

impl Engine {
    async fn open(&self, exam_mode: ExamMode) -> Uuid {
        session_service::create_session(
            &self.state,
            CreateSessionRequest {
                quiz_id: self.quiz.id,
                allow_late_joiners: false,
                exam_mode,
            },
        )
        .await
        .unwrap()
        .id
    }

    async fn join(&self, session_id: Uuid, nickname: &str) -> Uuid {
        let session = self.state.sessions().require(session_id).await.unwrap();
        session_service::join_session(
            &self.state,
            JoinRequest {
                join_code: session.join_code,
                nickname: nickname.into(),
            },
        )
        .await
        .unwrap()
        .participant_id
    }

    fn personal(&self, session_id: Uuid, participant_id: Uuid) -> Receiver<ServerEvent> {
        self.state.channels().subscribe(Channel::Participant {
            session_id,
            participant_id,
        })
    }

    async fn answer(
        &self,
        session_id: Uuid,
        participant_id: Uuid,
        answer_id: &str,
        question_index: usize,
        selected: &[&str],
        response_time_ms: u64,
    ) -> Result<(), ServiceError> {
        session_service::submit_answer(
            &self.state,
            session_id,
            participant_id,
            SubmitAnswerRequest {
                answer_id: answer_id.into(),
                question_id: self.quiz.questions[question_index].id,
                selected_option_ids: selected.iter().map(|id| (*id).to_string()).collect(),
                value: None,
                response_time_ms,
            },
        )
        .await
        .map(|_| ())
    }
}

/// Wait for the next event called `name`, skipping others.
async fn next_named(receiver: &mut Receiver<ServerEvent>, name: &str) -> Value {
    loop {
        let event = tokio::time::timeout(Duration::from_secs(5), receiver.recv())
            .await
            .expect("timed out waiting for event")
            .expect("channel closed");
        if event.event.as_deref() == Some(name) {
            return serde_json::from_str(&event.data).unwrap();
        }
    }
}

/// Everything already buffered on a receiver.
fn drain(receiver: &mut Receiver<ServerEvent>) -> Vec<ServerEvent> {
    let mut events = Vec::new();
    while let Ok(event) = receiver.try_recv() {
        events.push(event);
    }
    events
}

fn count_named(events: &[ServerEvent], name: &str) -> usize {
    events
        .iter()
        .filter(|event| event.event.as_deref() == Some(name))
        .count()
}

#[tokio::test]
async fn full_session_scores_ranks_and_persists_answers() {
    let mut first = question(vec![option("a", false), option("b", true)]);
    first.speed_bonus_multiplier = 0.5;
    let mut second = question(vec![
        option("a", true),
        option("b", false),
        option("c", true),
        option("d", false),
    ]);
    second.partial_credit = true;
    let engine = engine(quiz(vec![first, second])).await;

    let session_id = engine.open(ExamMode::default()).await;
    let alice = engine.join(session_id, "alice").await;
    let bob = engine.join(session_id, "bob").await;
    let mut alice_rx = engine.personal(session_id, alice);
    let mut bob_rx = engine.personal(session_id, bob);
    let mut controller = engine.state.channels().subscribe(Channel::Controller(session_id));

    let started = session_service::start_quiz(&engine.state, session_id).await.unwrap();
    assert_eq!(started.state, SessionPhase::ActiveQuestion);

    engine.answer(session_id, alice, "alice-q1", 0, &["b"], 0).await.unwrap();
    engine.answer(session_id, bob, "bob-q1", 0, &["b"], 15_000).await.unwrap();
    let alice_q1 = next_named(&mut alice_rx, broadcast::EVENT_ANSWER_RESULT).await;
    let bob_q1 = next_named(&mut bob_rx, broadcast::EVENT_ANSWER_RESULT).await;
    assert_eq!(alice_q1["score"]["speed_bonus"], 50);
    assert_eq!(alice_q1["total_score"], 150);
    assert_eq!(bob_q1["score"]["speed_bonus"], 25);
    assert_eq!(bob_q1["total_score"], 125);

    let revealed = session_service::reveal_question(&engine.state, session_id).await.unwrap();
    assert_eq!(revealed.state, SessionPhase::Reveal);
    let next = session_service::next_question(&engine.state, session_id).await.unwrap();
    assert_eq!(next.current_question_index, Some(1));

    // one of two correct options and nothing wrong earns half the points
    engine.answer(session_id, alice, "alice-q2", 1, &["a"], 4_000).await.unwrap();
    engine.answer(session_id, bob, "bob-q2", 1, &["a", "c"], 4_000).await.unwrap();
    let alice_q2 = next_named(&mut alice_rx, broadcast::EVENT_ANSWER_RESULT).await;
    let bob_q2 = next_named(&mut bob_rx, broadcast::EVENT_ANSWER_RESULT).await;
    assert_eq!(alice_q2["score"]["partial_credit"], 50);
    assert_eq!(alice_q2["score"]["streak"], 0);
    assert_eq!(bob_q2["score"]["streak_bonus"], 10);
    assert_eq!(bob_q2["total_score"], 235);

    let board = session_service::leaderboard(&engine.state, session_id, None).await.unwrap();
    assert_eq!(board.len(), 2);
    assert_eq!((board[0].participant_id, board[0].total_score), (bob, 235));
    assert_eq!((board[1].participant_id, board[1].total_score), (alice, 200));

    let standing = session_service::participant_standing(&engine.state, session_id, alice)
        .await
        .unwrap();
    assert_eq!(standing.rank, Some(2));

    let ended = session_service::end_quiz(&engine.state, session_id).await.unwrap();
    assert_eq!(ended.state, SessionPhase::Ended);
    let final_board = next_named(&mut controller, broadcast::EVENT_QUIZ_ENDED).await;
    assert_eq!(final_board["leaderboard"][0]["participant_id"], bob.to_string());
    assert_eq!(engine.durable.count(ANSWERS_COLLECTION), 4);

    let late = engine.answer(session_id, alice, "alice-late", 1, &["a"], 1_000).await;
    assert!(matches!(late, Err(ServiceError::InvalidState(_))));
}

#[tokio::test]
async fn repeated_answer_id_is_scored_once() {
    let engine = engine(quiz(vec![question(vec![option("a", true), option("b", false)])])).await;
    let session_id = engine.open(ExamMode::default()).await;
    let alice = engine.join(session_id, "alice").await;
    let mut alice_rx = engine.personal(session_id, alice);
    session_service::start_quiz(&engine.state, session_id).await.unwrap();

    engine.answer(session_id, alice, "same", 0, &["a"], 1_000).await.unwrap();
    next_named(&mut alice_rx, broadcast::EVENT_ANSWER_RESULT).await;
    // a retried request carrying the same id is accepted but not rescored
    engine.answer(session_id, alice, "same", 0, &["a"], 1_000).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let score = engine.state.scores().get(session_id, alice).await.unwrap();
    assert_eq!(score.total_score, 100);
    assert_eq!(count_named(&drain(&mut alice_rx), broadcast::EVENT_ANSWER_RESULT), 0);

    let second = engine.answer(session_id, alice, "other", 0, &["b"], 2_000).await;
    assert!(matches!(second, Err(ServiceError::InvalidState(_))));
}

#[tokio::test]
async fn negative_marking_never_drops_a_score_below_zero() {
    let engine = engine(quiz(vec![
        question(vec![option("a", true), option("b", false)]),
        question(vec![option("a", false), option("b", true)]),
    ]))
    .await;
    let session_id = engine
        .open(ExamMode {
            negative_marking: true,
            negative_marking_percentage: 25,
            ..ExamMode::default()
        })
        .await;
    let alice = engine.join(session_id, "alice").await;
    let mut alice_rx = engine.personal(session_id, alice);
    session_service::start_quiz(&engine.state, session_id).await.unwrap();

    engine.answer(session_id, alice, "wrong-1", 0, &["b"], 1_000).await.unwrap();
    let first = next_named(&mut alice_rx, broadcast::EVENT_ANSWER_RESULT).await;
    assert_eq!(first["score"]["negative_deduction"], 0);
    assert_eq!(first["total_score"], 0);

    session_service::reveal_question(&engine.state, session_id).await.unwrap();
    session_service::next_question(&engine.state, session_id).await.unwrap();
    engine.answer(session_id, alice, "wrong-2", 1, &["a"], 1_000).await.unwrap();
    let second = next_named(&mut alice_rx, broadcast::EVENT_ANSWER_RESULT).await;
    assert_eq!(second["total_score"], 0);
    assert!(engine.state.scores().get(session_id, alice).await.unwrap().total_score >= 0);
}

#[tokio::test]
async fn equal_scores_rank_the_faster_participant_first() {
    let engine = engine(quiz(vec![question(vec![option("a", true), option("b", false)])])).await;
    let session_id = engine.open(ExamMode::default()).await;
    let slow = engine.join(session_id, "slow").await;
    let fast = engine.join(session_id, "fast").await;
    let mut slow_rx = engine.personal(session_id, slow);
    let mut fast_rx = engine.personal(session_id, fast);
    session_service::start_quiz(&engine.state, session_id).await.unwrap();

    engine.answer(session_id, slow, "slow-1", 0, &["a"], 9_000).await.unwrap();
    engine.answer(session_id, fast, "fast-1", 0, &["a"], 2_000).await.unwrap();
    next_named(&mut slow_rx, broadcast::EVENT_ANSWER_RESULT).await;
    next_named(&mut fast_rx, broadcast::EVENT_ANSWER_RESULT).await;

    let board = session_service::leaderboard(&engine.state, session_id, Some(10))
        .await
        .unwrap();
    assert_eq!(board[0].total_score, board[1].total_score);
    assert_eq!(board[0].participant_id, fast);
    assert_eq!(board[0].rank, 1);
    assert_eq!(board[1].participant_id, slow);
}

#[tokio::test]
async fn ffi_rewards_the_first_correct_arrivals() {
    let mut ffi_quiz = quiz(vec![question(vec![option("a", true), option("b", false)])]);
    ffi_quiz.quiz_type = QuizType::Ffi;
    ffi_quiz.ffi = Some(FfiSettings {
        winners_per_question: 3,
    });
    let engine = engine(ffi_quiz).await;
    let session_id = engine.open(ExamMode::default()).await;

    let mut players = Vec::new();
    for nickname in ["p1", "p2", "p3", "p4", "p5"] {
        let id = engine.join(session_id, nickname).await;
        players.push((id, engine.personal(session_id, id)));
    }
    let mut display = engine.state.channels().subscribe(Channel::Display(session_id));
    session_service::start_quiz(&engine.state, session_id).await.unwrap();

    for (index, (participant_id, _)) in players.iter().enumerate() {
        let selected = if index < 4 { "a" } else { "b" };
        engine
            .answer(session_id, *participant_id, &format!("ffi-{index}"), 0, &[selected], 1_000)
            .await
            .unwrap();
        // distinct arrival timestamps
        tokio::time::sleep(Duration::from_millis(3)).await;
    }
    for (_, receiver) in players.iter_mut() {
        next_named(receiver, broadcast::EVENT_ANSWER_RESULT).await;
    }

    session_service::reveal_question(&engine.state, session_id).await.unwrap();
    let reveal = next_named(&mut display, broadcast::EVENT_REVEAL_ANSWERS).await;
    let expected: Vec<Value> = players[..3]
        .iter()
        .map(|(id, _)| Value::String(id.to_string()))
        .collect();
    assert_eq!(reveal["ffi_winners"], Value::Array(expected));
    assert_eq!(reveal["stats"]["answer_count"], 5);
    assert_eq!(reveal["stats"]["correct_count"], 4);
}

fn option_ids(payload: &Value) -> Vec<String> {
    payload["options"]
        .as_array()
        .unwrap()
        .iter()
        .map(|option| {
            assert!(option.get("is_correct").is_none());
            option["id"].as_str().unwrap().to_string()
        })
        .collect()
}

#[tokio::test]
async fn question_broadcast_hides_the_answer_key_until_reveal() {
    let mut shuffled = question(vec![
        option("a", false),
        option("b", true),
        option("c", false),
        option("d", false),
    ]);
    shuffled.shuffle_options = true;
    let engine = engine(quiz(vec![shuffled])).await;
    let session_id = engine.open(ExamMode::default()).await;
    let alice = engine.join(session_id, "alice").await;
    let bob = engine.join(session_id, "bob").await;
    let mut alice_rx = engine.personal(session_id, alice);
    let mut bob_rx = engine.personal(session_id, bob);
    let mut display = engine.state.channels().subscribe(Channel::Display(session_id));
    let mut controller = engine.state.channels().subscribe(Channel::Controller(session_id));
    let mut everyone = engine.state.channels().subscribe(Channel::Participants(session_id));

    session_service::start_quiz(&engine.state, session_id).await.unwrap();

    let display_events = drain(&mut display);
    let shown = display_events
        .iter()
        .find(|event| event.event.as_deref() == Some(broadcast::EVENT_QUESTION_STARTED))
        .expect("question_started on display");
    assert!(!shown.data.contains("is_correct"));
    assert!(!shown.data.contains("isCorrect"));
    let canonical = ["a", "b", "c", "d"];
    assert_eq!(option_ids(&serde_json::from_str(&shown.data).unwrap()), canonical);
    let on_controller = next_named(&mut controller, broadcast::EVENT_QUESTION_STARTED).await;
    assert_eq!(option_ids(&on_controller), canonical);

    // shuffled orders go to personal channels only, so nobody gets two copies
    assert_eq!(
        count_named(&drain(&mut everyone), broadcast::EVENT_QUESTION_STARTED),
        0
    );
    for receiver in [&mut alice_rx, &mut bob_rx] {
        let personal = next_named(receiver, broadcast::EVENT_QUESTION_STARTED).await;
        let mut ids = option_ids(&personal);
        ids.sort();
        assert_eq!(ids, canonical);
        assert_eq!(
            count_named(&drain(receiver), broadcast::EVENT_QUESTION_STARTED),
            0
        );
    }

    session_service::reveal_question(&engine.state, session_id).await.unwrap();
    let reveal = next_named(&mut display, broadcast::EVENT_REVEAL_ANSWERS).await;
    assert_eq!(reveal["correct_option_ids"], serde_json::json!(["b"]));
}

#[tokio::test]
async fn answers_only_count_for_the_open_question() {
    let engine = engine(quiz(vec![
        question(vec![option("a", true), option("b", false)]),
        question(vec![option("a", true), option("b", false)]),
    ]))
    .await;
    let session_id = engine.open(ExamMode::default()).await;
    let alice = engine.join(session_id, "alice").await;
    let bob = engine.join(session_id, "bob").await;
    let mut alice_rx = engine.personal(session_id, alice);
    session_service::start_quiz(&engine.state, session_id).await.unwrap();
    let upcoming = engine.quiz.questions[1].id;

    let early = engine.answer(session_id, alice, "alice-early", 1, &["a"], 500).await;
    assert!(matches!(early, Err(ServiceError::InvalidState(_))));
    assert_eq!(
        engine.state.ffi().submission_count(session_id, upcoming).await.unwrap(),
        0
    );
    assert!(
        engine
            .state
            .answers()
            .get(session_id, "alice-early")
            .await
            .unwrap()
            .is_none()
    );

    // the just-revealed question still takes answers under the default policy
    session_service::reveal_question(&engine.state, session_id).await.unwrap();
    engine.answer(session_id, bob, "bob-late", 0, &["a"], 29_000).await.unwrap();

    session_service::next_question(&engine.state, session_id).await.unwrap();
    let stale = engine.answer(session_id, alice, "alice-stale", 0, &["a"], 1_000).await;
    assert!(matches!(stale, Err(ServiceError::InvalidState(_))));
    engine.answer(session_id, alice, "alice-q2", 1, &["a"], 1_000).await.unwrap();
    let result = next_named(&mut alice_rx, broadcast::EVENT_ANSWER_RESULT).await;
    assert_eq!(result["question_id"], upcoming.to_string());
    assert_eq!(result["total_score"], 100);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_answers_to_one_question_score_once() {
    let engine = engine(quiz(vec![question(vec![option("a", true), option("b", false)])])).await;
    let session_id = engine.open(ExamMode::default()).await;
    let alice = engine.join(session_id, "alice").await;
    let mut alice_rx = engine.personal(session_id, alice);
    session_service::start_quiz(&engine.state, session_id).await.unwrap();
    let question_id = engine.quiz.questions[0].id;

    let attempts: Vec<_> = (0..8)
        .map(|attempt| {
            let state = engine.state.clone();
            tokio::spawn(async move {
                session_service::submit_answer(
                    &state,
                    session_id,
                    alice,
                    SubmitAnswerRequest {
                        answer_id: format!("race-{attempt}"),
                        question_id,
                        selected_option_ids: vec!["a".into()],
                        value: None,
                        response_time_ms: 1_000,
                    },
                )
                .await
            })
        })
        .collect();
    let mut accepted = 0;
    for attempt in attempts {
        match attempt.await.unwrap() {
            Ok(_) => accepted += 1,
            Err(err) => assert!(matches!(err, ServiceError::InvalidState(_))),
        }
    }
    assert_eq!(accepted, 1);

    next_named(&mut alice_rx, broadcast::EVENT_ANSWER_RESULT).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(count_named(&drain(&mut alice_rx), broadcast::EVENT_ANSWER_RESULT), 0);
    let score = engine.state.scores().get(session_id, alice).await.unwrap();
    assert_eq!(score.total_score, 100);
}

#[tokio::test]
async fn broadcasts_out_of_phase_publish_nothing() {
    let engine = engine(quiz(vec![question(vec![option("a", true)])])).await;
    let session_id = engine.open(ExamMode::default()).await;
    let mut controller = engine.state.channels().subscribe(Channel::Controller(session_id));

    let outcome = broadcast::quiz_started(&engine.state, session_id).await.unwrap();
    assert_eq!(outcome, BroadcastOutcome::Suppressed(SessionPhase::Lobby));
    let question_id = engine.quiz.questions[0].id;
    let reveal = broadcast::reveal_answers(&engine.state, session_id, question_id)
        .await
        .unwrap();
    assert_eq!(reveal, BroadcastOutcome::Suppressed(SessionPhase::Lobby));
    let ended = broadcast::quiz_ended(&engine.state, session_id).await.unwrap();
    assert!(!ended.is_published());

    assert!(drain(&mut controller).is_empty());
    assert_eq!(
        engine.state.sessions().require(session_id).await.unwrap().state,
        SessionPhase::Lobby
    );
}

#[tokio::test]
async fn writes_parked_during_an_outage_replay_in_order() {
    let engine = engine(quiz(vec![question(vec![option("a", true)])])).await;
    engine.durable.simulate_outage(true);

    for id in ["A", "B", "C"] {
        engine
            .state
            .guard()
            .execute(WriteOperation::ReplaceOne {
                collection: SESSIONS_COLLECTION.into(),
                id: id.into(),
                document: serde_json::json!({ "id": id }),
            })
            .await
            .unwrap();
    }
    assert!(engine.state.guard().is_degraded());
    let pending = fallback_service::pending_writes(&engine.state).await.unwrap();
    assert_eq!(pending.count, 3);
    let parked: Vec<_> = pending
        .writes
        .iter()
        .map(|write| write.document_ids.clone())
        .collect();
    assert_eq!(parked, [vec!["A".to_string()], vec!["B".into()], vec!["C".into()]]);

    engine.durable.simulate_outage(false);
    let report = fallback_service::replay(&engine.state).await.unwrap();
    assert_eq!((report.replayed, report.remaining), (3, 0));

    let replayed: Vec<String> = engine
        .durable
        .applied_writes()
        .iter()
        .flat_map(WriteOperation::document_ids)
        .collect();
    assert_eq!(replayed, ["A", "B", "C"]);
}

#[tokio::test]
async fn moderation_blocks_answers_and_rejoins() {
    let engine = engine(quiz(vec![question(vec![option("a", true)])])).await;
    let session_id = engine.open(ExamMode::default()).await;
    let mallory = engine.join(session_id, "mallory").await;
    let carol = engine.join(session_id, "carol").await;

    let duplicate = session_service::join_session(
        &engine.state,
        JoinRequest {
            join_code: engine.state.sessions().require(session_id).await.unwrap().join_code,
            nickname: "carol".into(),
        },
    )
    .await;
    assert!(matches!(duplicate, Err(ServiceError::InvalidState(_))));

    session_service::set_participant_status(&engine.state, session_id, mallory, ParticipantStatus::Banned)
        .await
        .unwrap();
    session_service::set_participant_status(&engine.state, session_id, carol, ParticipantStatus::Kicked)
        .await
        .unwrap();

    let join_code = engine.state.sessions().require(session_id).await.unwrap().join_code;
    let rejoin = session_service::join_session(
        &engine.state,
        JoinRequest {
            join_code,
            nickname: "mallory".into(),
        },
    )
    .await;
    assert!(matches!(rejoin, Err(ServiceError::InvalidState(_))));

    session_service::start_quiz(&engine.state, session_id).await.unwrap();
    let kicked = engine.answer(session_id, carol, "carol-1", 0, &["a"], 1_000).await;
    assert!(matches!(kicked, Err(ServiceError::InvalidState(_))));

    let events = engine.audit.events();
    assert!(events.iter().any(|event| matches!(event, AuditEvent::ParticipantBanned { .. })));
    assert!(events.iter().any(|event| matches!(event, AuditEvent::ParticipantKicked { .. })));
    assert!(events.iter().any(|event| matches!(event, AuditEvent::RejoinRefused { .. })));
}

#[tokio::test]
async fn late_joiners_are_refused_unless_allowed() {
    let engine = engine(quiz(vec![question(vec![option("a", true)])])).await;
    let session_id = engine.open(ExamMode::default()).await;
    engine.join(session_id, "early").await;
    session_service::start_quiz(&engine.state, session_id).await.unwrap();

    let join_code = engine.state.sessions().require(session_id).await.unwrap().join_code;
    let late = session_service::join_session(
        &engine.state,
        JoinRequest {
            join_code,
            nickname: "late".into(),
        },
    )
    .await;
    assert!(matches!(late, Err(ServiceError::InvalidState(_))));
}

#[tokio::test]
async fn dropped_participant_stream_marks_disconnect_and_reconnect() {
    let engine = engine(quiz(vec![question(vec![option("a", true)])])).await;
    let session_id = engine.open(ExamMode::default()).await;
    let alice = engine.join(session_id, "alice").await;
    let mut controller = engine.state.channels().subscribe(Channel::Controller(session_id));

    sse_service::mark_disconnected(&engine.state, session_id, alice).await;
    let participant = engine.state.participants().get(session_id, alice).await.unwrap().unwrap();
    assert_eq!(participant.status, ParticipantStatus::Disconnected);
    let change = next_named(&mut controller, broadcast::EVENT_PARTICIPANT_STATUS_CHANGED).await;
    assert_eq!(change["status"], "disconnected");

    let receivers = sse_service::subscribe_participant(&engine.state, session_id, alice)
        .await
        .unwrap();
    assert_eq!(receivers.len(), 2);
    let participant = engine.state.participants().get(session_id, alice).await.unwrap().unwrap();
    assert_eq!(participant.status, ParticipantStatus::Active);
    let change = next_named(&mut controller, broadcast::EVENT_PARTICIPANT_STATUS_CHANGED).await;
    assert_eq!(change["status"], "active");
}

#[tokio::test(start_paused = true)]
async fn question_timer_reveals_exactly_once() {
    let mut timed = question(vec![option("a", true), option("b", false)]);
    timed.time_limit_secs = 10;
    let engine = engine(quiz(vec![timed])).await;
    let session_id = engine.open(ExamMode::default()).await;
    let mut display = engine.state.channels().subscribe(Channel::Display(session_id));

    session_service::start_quiz(&engine.state, session_id).await.unwrap();
    assert_eq!(engine.state.timers().active_count(), 1);

    tokio::time::sleep(Duration::from_secs(11)).await;
    let session = engine.state.sessions().require(session_id).await.unwrap();
    assert_eq!(session.state, SessionPhase::Reveal);
    assert_eq!(engine.state.timers().active_count(), 0);

    // the host pressing reveal after expiry changes nothing
    let manual = session_service::reveal_question(&engine.state, session_id).await;
    assert!(matches!(manual, Err(ServiceError::InvalidState(_))));
    tokio::time::sleep(Duration::from_secs(30)).await;

    let events = drain(&mut display);
    assert_eq!(count_named(&events, broadcast::EVENT_REVEAL_ANSWERS), 1);
}

#[tokio::test(start_paused = true)]
async fn next_during_an_open_question_keeps_its_countdown() {
    let mut first = question(vec![option("a", true)]);
    first.time_limit_secs = 10;
    let engine = engine(quiz(vec![first, question(vec![option("a", true)])])).await;
    let session_id = engine.open(ExamMode::default()).await;
    let question_id = engine.quiz.questions[0].id;
    session_service::start_quiz(&engine.state, session_id).await.unwrap();

    let early = session_service::next_question(&engine.state, session_id).await;
    assert!(matches!(early, Err(ServiceError::InvalidState(_))));
    let session = engine.state.sessions().require(session_id).await.unwrap();
    assert_eq!(session.state, SessionPhase::ActiveQuestion);
    assert!(engine.state.timers().is_active(session_id, question_id));

    tokio::time::sleep(Duration::from_secs(11)).await;
    let session = engine.state.sessions().require(session_id).await.unwrap();
    assert_eq!(session.state, SessionPhase::Reveal);
    assert_eq!(session.current_question_index, Some(0));
}

#[tokio::test(start_paused = true)]
async fn auto_advance_walks_the_quiz_to_the_end() {
    let mut first = question(vec![option("a", true)]);
    first.time_limit_secs = 10;
    let mut second = question(vec![option("a", true)]);
    second.time_limit_secs = 10;
    let engine = engine(quiz(vec![first, second])).await;
    let session_id = engine
        .open(ExamMode {
            auto_advance: true,
            ..ExamMode::default()
        })
        .await;
    let mut display = engine.state.channels().subscribe(Channel::Display(session_id));

    session_service::start_quiz(&engine.state, session_id).await.unwrap();
    // two questions of 10s, each followed by the default 5s reveal pause
    tokio::time::sleep(Duration::from_secs(31)).await;

    let session = engine.state.sessions().require(session_id).await.unwrap();
    assert_eq!(session.state, SessionPhase::Ended);
    let events = drain(&mut display);
    assert_eq!(count_named(&events, broadcast::EVENT_QUESTION_STARTED), 2);
    assert_eq!(count_named(&events, broadcast::EVENT_REVEAL_ANSWERS), 2);
    assert_eq!(count_named(&events, broadcast::EVENT_QUIZ_ENDED), 1);
    assert_eq!(engine.state.timers().active_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn manual_next_cancels_the_pending_auto_advance() {
    let mut first = question(vec![option("a", true)]);
    first.time_limit_secs = 10;
    let mut second = question(vec![option("a", true)]);
    second.time_limit_secs = 60;
    let engine = engine(quiz(vec![first, second])).await;
    let session_id = engine
        .open(ExamMode {
            auto_advance: true,
            ..ExamMode::default()
        })
        .await;

    session_service::start_quiz(&engine.state, session_id).await.unwrap();
    session_service::reveal_question(&engine.state, session_id).await.unwrap();
    let next = session_service::next_question(&engine.state, session_id).await.unwrap();
    assert_eq!(next.current_question_index, Some(1));

    // the cancelled auto-advance must not skip the second question
    tokio::time::sleep(Duration::from_secs(20)).await;
    let session = engine.state.sessions().require(session_id).await.unwrap();
    assert_eq!(session.state, SessionPhase::ActiveQuestion);
    assert_eq!(session.current_question_index, Some(1));
}
