mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use common::{capture_notices, lock, notification, session};
use pg_session::{
    Error, Guest, HandlerError, Notification, NotificationHandler, NotificationReceiver,
};

fn recording_handler(seen: &Arc<Mutex<Vec<String>>>) -> NotificationHandler {
    let sink = seen.clone();
    Box::new(move |n: &Notification<'_>| {
        sink.lock()
            .unwrap()
            .push(format!("{}:{}:{}", n.channel, n.payload, n.backend_pid));
        Ok(())
    })
}

#[test]
fn listen_overwrite_and_clear_issue_one_listen_and_one_unlisten() {
    let (mut session, script) = session();
    let first = Arc::new(Mutex::new(Vec::new()));
    let second = Arc::new(Mutex::new(Vec::new()));

    session
        .listen("orders", Some(recording_handler(&first)))
        .unwrap();
    session
        .listen("orders", Some(recording_handler(&second)))
        .unwrap();
    assert_eq!(session.listened_channels().collect::<Vec<_>>(), vec!["orders"]);

    lock(&script)
        .notifications
        .push_back(notification("orders", "42"));
    assert_eq!(session.get_notifs().unwrap(), 1);
    assert!(first.lock().unwrap().is_empty());
    assert_eq!(*second.lock().unwrap(), vec!["orders:42:99".to_string()]);

    session.listen("orders", None).unwrap();
    session.listen("orders", None).unwrap();

    assert_eq!(
        lock(&script).statements,
        vec!["LISTEN \"orders\"", "UNLISTEN \"orders\""]
    );
    assert_eq!(session.listened_channels().count(), 0);
}

#[test]
fn listen_inside_a_transaction_is_refused() {
    let (mut session, script) = session();
    let guest = Guest::new("transaction", "");
    session.register_transaction(&guest).unwrap();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let err = session
        .listen("orders", Some(recording_handler(&seen)))
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Usage(m) if m == "Attempting to listen for notifications on 'orders' while transaction is active."
    ));
    assert!(lock(&script).statements.is_empty());
    session.unregister_transaction(&guest);
}

#[test]
fn notifications_wait_for_the_transaction_to_end() {
    let (mut session, script) = session();
    let seen = Arc::new(Mutex::new(Vec::new()));
    session.listen("jobs", Some(recording_handler(&seen))).unwrap();

    let guest = Guest::new("transaction", "");
    session.register_transaction(&guest).unwrap();
    {
        let mut script = lock(&script);
        script.notifications.push_back(notification("jobs", "a"));
        script.notifications.push_back(notification("jobs", "b"));
    }

    assert_eq!(session.get_notifs().unwrap(), 0);
    assert!(seen.lock().unwrap().is_empty());

    session.unregister_transaction(&guest);
    assert_eq!(session.get_notifs().unwrap(), 2);
    assert_eq!(
        *seen.lock().unwrap(),
        vec!["jobs:a:99".to_string(), "jobs:b:99".to_string()]
    );
}

#[test]
fn notifications_arrive_with_query_results() {
    let (mut session, script) = session();
    let seen = Arc::new(Mutex::new(Vec::new()));
    session.listen("jobs", Some(recording_handler(&seen))).unwrap();

    lock(&script).notifications.push_back(notification("jobs", "x"));
    session.exec("SELECT 1").unwrap();
    assert_eq!(*seen.lock().unwrap(), vec!["jobs:x:99".to_string()]);
}

#[test]
fn failing_handler_becomes_a_notice() {
    let (mut session, script) = session();
    let notices = capture_notices(&session);
    session
        .listen(
            "jobs",
            Some(Box::new(|_: &Notification<'_>| {
                Err::<(), HandlerError>("boom".into())
            })),
        )
        .unwrap();

    lock(&script).notifications.push_back(notification("jobs", "x"));
    assert_eq!(session.get_notifs().unwrap(), 1);
    assert_eq!(
        *notices.lock().unwrap(),
        vec!["Exception in notification handler 'jobs': boom\n".to_string()]
    );
}

#[test]
fn await_returns_what_arrived() {
    let (mut session, script) = session();
    let seen = Arc::new(Mutex::new(Vec::new()));
    session.listen("jobs", Some(recording_handler(&seen))).unwrap();

    assert_eq!(
        session
            .await_notification_timeout(Duration::from_millis(10))
            .unwrap(),
        0
    );

    lock(&script).arriving.push_back(notification("jobs", "late"));
    assert_eq!(session.await_notification().unwrap(), 1);
    assert_eq!(*seen.lock().unwrap(), vec!["jobs:late:99".to_string()]);
}

struct Receiver {
    channel: String,
    seen: Mutex<Vec<String>>,
    fail: bool,
}

impl Receiver {
    fn new(channel: &str, fail: bool) -> Arc<Self> {
        Arc::new(Self {
            channel: channel.into(),
            seen: Mutex::new(Vec::new()),
            fail,
        })
    }
}

impl NotificationReceiver for Receiver {
    fn channel(&self) -> &str {
        &self.channel
    }

    fn receive(&self, payload: &str, _backend_pid: u32) -> Result<(), HandlerError> {
        self.seen.lock().unwrap().push(payload.to_string());
        if self.fail {
            return Err("receiver failed".into());
        }
        Ok(())
    }
}

#[test]
fn receivers_listen_once_per_channel() {
    let (mut session, script) = session();
    let a = Receiver::new("stock", false);
    let b = Receiver::new("stock", false);
    let a_dyn: Arc<dyn NotificationReceiver> = a.clone();
    let b_dyn: Arc<dyn NotificationReceiver> = b.clone();

    session.add_receiver(a_dyn.clone()).unwrap();
    session.add_receiver(b_dyn.clone()).unwrap();
    lock(&script).notifications.push_back(notification("stock", "low"));
    assert_eq!(session.get_notifs().unwrap(), 1);
    assert_eq!(*a.seen.lock().unwrap(), vec!["low".to_string()]);
    assert_eq!(*b.seen.lock().unwrap(), vec!["low".to_string()]);

    session.remove_receiver(&a_dyn);
    assert_eq!(lock(&script).statements, vec!["LISTEN \"stock\""]);
    session.remove_receiver(&b_dyn);
    assert_eq!(
        lock(&script).statements,
        vec!["LISTEN \"stock\"", "UNLISTEN \"stock\""]
    );
}

#[test]
fn removing_an_unknown_receiver_is_only_a_notice() {
    let (mut session, script) = session();
    let notices = capture_notices(&session);
    let stranger: Arc<dyn NotificationReceiver> = Receiver::new("stock", false);

    session.remove_receiver(&stranger);

    assert!(lock(&script).statements.is_empty());
    assert_eq!(
        *notices.lock().unwrap(),
        vec!["Attempt to remove unknown receiver 'stock'\n".to_string()]
    );
}

#[test]
fn failing_receiver_does_not_stop_the_others() {
    let (mut session, script) = session();
    let notices = capture_notices(&session);
    let bad = Receiver::new("stock", true);
    let good = Receiver::new("stock", false);
    session.add_receiver(bad.clone()).unwrap();
    session.add_receiver(good.clone()).unwrap();

    lock(&script).notifications.push_back(notification("stock", "p"));
    session.get_notifs().unwrap();

    assert_eq!(*good.seen.lock().unwrap(), vec!["p".to_string()]);
    assert_eq!(
        *notices.lock().unwrap(),
        vec!["Exception in notification receiver 'stock': receiver failed\n".to_string()]
    );
    session.close().unwrap();
}

#[test]
fn receivers_pin_the_session() {
    let (mut session, _script) = session();
    let notices = capture_notices(&session);
    let receiver: Arc<dyn NotificationReceiver> = Receiver::new("stock", false);
    session.add_receiver(receiver).unwrap();

    let err = session.take().unwrap_err();
    assert!(matches!(
        err,
        Error::Usage(m) if m == "Moving a connection with notification receivers registered."
    ));

    session.close().unwrap();
    assert_eq!(
        *notices.lock().unwrap(),
        vec!["Closing connection with outstanding receivers.\n".to_string()]
    );
}
