//! Integration tests for the dispatcher and the chunked response protocol.
//!
//! These run real worker pools on the tokio runtime and check what a
//! requester observes on its channel: header first, chunks in order, and
//! no interleaving between responses.

use std::sync::Arc;
use std::time::Duration;

use simple_db::config::EngineConfig;
use simple_db::dispatcher::{
    channel_name, Dispatcher, QueryEnvelope, RequesterId, ResponseHeader, ResponseMessage, ResponseRouter,
    MAX_CHUNK,
};
use simple_db::engine::{Comparator, Constraint, Engine, FieldId, Query, Record, Value};

fn config(workers: usize) -> EngineConfig {
    EngineConfig {
        capacity: 4096,
        workers,
        ..EngineConfig::default()
    }
}

fn start(workers: usize) -> Dispatcher {
    let config = config(workers);
    Dispatcher::start(Arc::new(Engine::from_config(&config)), &config).unwrap()
}

#[tokio::test]
async fn three_thousand_byte_result_arrives_as_three_chunks() {
    let router = ResponseRouter::new(8, MAX_CHUNK);
    let alice = RequesterId(1);
    let mut inbox = router.subscribe(alice).unwrap();
    assert_eq!(inbox.name(), channel_name(alice));

    let body: String = (0..3000).map(|i| char::from(b'a' + (i % 26) as u8)).collect();
    let deliver = {
        let body = body.clone();
        async move { router.deliver(alice, &body).await }
    };
    let receive = async {
        let mut messages = Vec::new();
        for _ in 0..4 {
            messages.push(inbox.recv_message().await.unwrap());
        }
        messages
    };
    let (delivered, messages) = tokio::join!(deliver, receive);
    delivered.unwrap();

    assert_eq!(
        messages[0],
        ResponseMessage::Header(ResponseHeader {
            requester: alice,
            parts: 3,
            total_bytes: 3000,
        })
    );
    let mut joined = Vec::new();
    let mut sizes = Vec::new();
    for (expected_seq, message) in messages[1..].iter().enumerate() {
        match message {
            ResponseMessage::Chunk { seq, data } => {
                assert_eq!(*seq, expected_seq);
                sizes.push(data.len());
                joined.extend_from_slice(data);
            }
            other => panic!("expected chunk, got {other:?}"),
        }
    }
    assert_eq!(sizes, vec![1024, 1024, 952]);
    assert_eq!(joined, body.into_bytes());
}

#[tokio::test]
async fn large_select_is_reassembled_by_the_requester() {
    let dispatcher = start(4);
    let me = RequesterId(3);
    let mut inbox = dispatcher.subscribe(me).unwrap();

    let mut expected = String::new();
    for id in 0..300 {
        let record = Record::new(id, 30, 1.75, format!("member number {id}"));
        expected.push_str(&record.to_line());
        dispatcher
            .submit(QueryEnvelope::new(me, Query::Insert { record }))
            .await
            .unwrap();
        inbox.recv_response().await.unwrap();
    }
    assert!(expected.len() > 5 * MAX_CHUNK);

    dispatcher
        .submit(QueryEnvelope::new(me, Query::Select { constraint: None }))
        .await
        .unwrap();
    assert_eq!(inbox.recv_response().await.unwrap(), expected);

    dispatcher.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn many_requesters_each_get_their_own_results() {
    let dispatcher = Arc::new(start(4));
    let mut clients = Vec::new();

    for n in 0..16u64 {
        let dispatcher = Arc::clone(&dispatcher);
        clients.push(tokio::spawn(async move {
            let me = RequesterId(100 + n);
            let mut inbox = dispatcher.subscribe(me).unwrap();
            let id = n as i32;
            for age in 0..10 {
                let record = Record::new(id, age, 1.5, format!("client {n}"));
                dispatcher
                    .submit(QueryEnvelope::new(me, Query::Insert { record }))
                    .await
                    .unwrap();
                let reply = inbox.recv_response().await.unwrap();
                assert_eq!(reply, format!("Inserted {id};{age};1.5;client {n}\n"));

                let lookup = Query::Select {
                    constraint: Some(Constraint::new(FieldId::Id, Comparator::Equal, Value::Int(id))),
                };
                dispatcher.submit(QueryEnvelope::new(me, lookup)).await.unwrap();
                let reply = inbox.recv_response().await.unwrap();
                assert_eq!(reply, format!("{id};{age};1.5;client {n}\n"));
            }
        }));
    }

    for client in clients {
        tokio::time::timeout(Duration::from_secs(30), client)
            .await
            .expect("client timed out")
            .unwrap();
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_queries_from_one_requester_do_not_interleave() {
    let dispatcher = start(4);
    let me = RequesterId(7);
    let mut inbox = dispatcher.subscribe(me).unwrap();

    for id in 0..200 {
        let record = Record::new(id, 40, 1.8, "x".repeat(60));
        dispatcher
            .submit(QueryEnvelope::new(me, Query::Insert { record }))
            .await
            .unwrap();
        inbox.recv_response().await.unwrap();
    }
    let full: String = (0..200)
        .map(|id| format!("{id};40;1.8;{}\n", "x".repeat(60)))
        .collect();

    // Several multi-chunk selects in flight at once; each response must
    // still arrive whole.
    for _ in 0..4 {
        dispatcher
            .submit(QueryEnvelope::new(me, Query::Select { constraint: None }))
            .await
            .unwrap();
    }
    for _ in 0..4 {
        assert_eq!(inbox.recv_response().await.unwrap(), full);
    }

    dispatcher.shutdown().await;
}

#[tokio::test]
async fn handler_failure_travels_the_same_channel() {
    let dispatcher = start(2);
    let me = RequesterId(11);
    let mut inbox = dispatcher.subscribe(me).unwrap();

    let too_far = Query::Insert {
        record: Record::new(4096, 1, 1.0, "x"),
    };
    dispatcher.submit(QueryEnvelope::new(me, too_far)).await.unwrap();
    assert_eq!(
        inbox.recv_response().await.unwrap(),
        "ERROR: id 4096 is out of range (capacity 4096)\n"
    );

    // The requester's channel stays usable after an error.
    dispatcher
        .submit(QueryEnvelope::new(me, Query::Select { constraint: None }))
        .await
        .unwrap();
    assert_eq!(inbox.recv_response().await.unwrap(), "");

    dispatcher.shutdown().await;
}

#[tokio::test]
async fn intake_sender_can_be_shared() {
    let dispatcher = start(1);
    let me = RequesterId(12);
    let mut inbox = dispatcher.subscribe(me).unwrap();

    let intake = dispatcher.intake();
    intake
        .send(QueryEnvelope::new(
            me,
            Query::Insert {
                record: Record::new(1, 2, 3.5, "via intake"),
            },
        ))
        .await
        .unwrap();
    assert_eq!(inbox.recv_response().await.unwrap(), "Inserted 1;2;3.5;via intake\n");

    drop(intake);
    dispatcher.shutdown().await;
}
