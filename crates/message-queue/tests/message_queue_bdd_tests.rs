//! BDD tests for the bounded pub/sub event bus.

use cucumber::{given, then, when, World};
use message_queue::{EventBus, EventReceiver, RecvError};

#[derive(World)]
#[world(init = Self::new)]
struct MessageQueueWorld {
    bus: Option<EventBus<String>>,
    receiver: Option<EventReceiver<String>>,
    publish_count: Option<usize>,
    last_recv: Option<Result<String, RecvError>>,
}

impl std::fmt::Debug for MessageQueueWorld {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageQueueWorld")
            .field("publish_count", &self.publish_count)
            .field("last_recv", &self.last_recv)
            .finish()
    }
}

impl MessageQueueWorld {
    fn new() -> Self {
        Self {
            bus: None,
            receiver: None,
            publish_count: None,
            last_recv: None,
        }
    }
}

#[given("a message queue with one subscriber")]
async fn given_queue_with_subscriber(world: &mut MessageQueueWorld) {
    let bus = EventBus::new(16);
    let rx = bus.subscribe();
    world.bus = Some(bus);
    world.receiver = Some(rx);
}

#[given("a message queue with no subscribers")]
async fn given_queue_no_subscribers(world: &mut MessageQueueWorld) {
    world.bus = Some(EventBus::new(16));
}

#[given(regex = r#"^a message queue with capacity (\d+) and one subscriber that does not read$"#)]
async fn given_queue_with_capacity(world: &mut MessageQueueWorld, capacity: usize) {
    let bus = EventBus::new(capacity);
    let rx = bus.subscribe();
    world.bus = Some(bus);
    world.receiver = Some(rx);
}

#[when(regex = r#"^I send a message "(.*)"$"#)]
async fn when_send_message(world: &mut MessageQueueWorld, message: String) {
    let count = world.bus.as_ref().unwrap().publish(message);
    world.publish_count = Some(count);
}

#[when(regex = r#"^I send (\d+) messages in quick succession$"#)]
async fn when_send_n_messages(world: &mut MessageQueueWorld, n: usize) {
    let bus = world.bus.as_ref().unwrap();
    for i in 0..n {
        bus.publish(format!("message-{i}"));
    }
}

#[when("the subscriber finally reads")]
async fn when_subscriber_reads(world: &mut MessageQueueWorld) {
    let rx = world.receiver.as_mut().unwrap();
    world.last_recv = Some(rx.recv().await);
}

#[then("the message should be delivered")]
async fn then_message_delivered(world: &mut MessageQueueWorld) {
    let rx = world.receiver.as_mut().unwrap();
    let received = rx.recv().await.expect("expected a delivered message");
    assert_eq!(received, "reload-complete");
}

#[then("the send should succeed with zero receivers")]
async fn then_send_succeeds_zero_receivers(world: &mut MessageQueueWorld) {
    assert_eq!(world.publish_count, Some(0));
}

#[then("the subscriber should observe a lagged receive error")]
async fn then_subscriber_lags(world: &mut MessageQueueWorld) {
    assert!(matches!(world.last_recv, Some(Err(RecvError::Lagged(_)))));
}

#[tokio::main]
async fn main() {
    MessageQueueWorld::run("tests/features").await;
}
