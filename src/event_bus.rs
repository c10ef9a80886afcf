/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The event bus thread, which receives [events](crate::events) from the keeper thread and fires the
//! handlers registered for each event type: the default [loggers](crate::logging), the optional
//! [BI sink](crate::bi_sink), and user-supplied handlers from [`KeeperSpec`](crate::keeper::KeeperSpec).

use std::{
    sync::mpsc::{Receiver, RecvTimeoutError, TryRecvError},
    thread::{self, JoinHandle},
    time::Duration,
};

use crate::{bi_sink::BiSink, events::*, logging::Logger};

/// Pointer to a handler closure.
pub type HandlerPtr<T> = Box<dyn Fn(&T) + Send>;

/// How long the bus waits for an event before checking for shutdown again.
const EVENT_POLL_INTERVAL: Duration = Duration::from_millis(50);

pub(crate) struct EventHandlers {
    pub(crate) leader_changed_handlers: Vec<HandlerPtr<LeaderChangedEvent>>,
    pub(crate) committee_refreshed_handlers: Vec<HandlerPtr<CommitteeRefreshedEvent>>,
    pub(crate) committee_refresh_failed_handlers: Vec<HandlerPtr<CommitteeRefreshFailedEvent>>,
    pub(crate) exec_task_handlers: Vec<HandlerPtr<ExecTaskEvent>>,
    pub(crate) send_tx_handlers: Vec<HandlerPtr<SendTxEvent>>,
    pub(crate) tick_failed_handlers: Vec<HandlerPtr<TickFailedEvent>>,
}

impl EventHandlers {
    /// Collect the handlers of every event type: the default logger first (if `log_events`), then the BI
    /// sink's (if any), then the user-supplied handler.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        log_events: bool,
        bi_sink: Option<&BiSink>,
        on_leader_changed: Option<HandlerPtr<LeaderChangedEvent>>,
        on_committee_refreshed: Option<HandlerPtr<CommitteeRefreshedEvent>>,
        on_committee_refresh_failed: Option<HandlerPtr<CommitteeRefreshFailedEvent>>,
        on_exec_task: Option<HandlerPtr<ExecTaskEvent>>,
        on_send_tx: Option<HandlerPtr<SendTxEvent>>,
        on_tick_failed: Option<HandlerPtr<TickFailedEvent>>,
    ) -> Self {
        fn collect<T: Logger>(
            log_events: bool,
            bi_handler: Option<HandlerPtr<T>>,
            user_handler: Option<HandlerPtr<T>>,
        ) -> Vec<HandlerPtr<T>> {
            let mut handlers = Vec::new();
            if log_events {
                handlers.push(T::get_logger());
            }
            handlers.extend(bi_handler);
            handlers.extend(user_handler);
            handlers
        }

        Self {
            leader_changed_handlers: collect(
                log_events,
                bi_sink.map(BiSink::leader_changed_handler),
                on_leader_changed,
            ),
            committee_refreshed_handlers: collect(log_events, None, on_committee_refreshed),
            committee_refresh_failed_handlers: collect(
                log_events,
                None,
                on_committee_refresh_failed,
            ),
            exec_task_handlers: collect(
                log_events,
                bi_sink.map(BiSink::exec_task_handler),
                on_exec_task,
            ),
            send_tx_handlers: collect(log_events, bi_sink.map(BiSink::send_tx_handler), on_send_tx),
            tick_failed_handlers: collect(log_events, None, on_tick_failed),
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.leader_changed_handlers.is_empty()
            && self.committee_refreshed_handlers.is_empty()
            && self.committee_refresh_failed_handlers.is_empty()
            && self.exec_task_handlers.is_empty()
            && self.send_tx_handlers.is_empty()
            && self.tick_failed_handlers.is_empty()
    }

    pub(crate) fn fire_handlers(&self, event: Event) {
        match event {
            Event::LeaderChanged(leader_changed_event) => self
                .leader_changed_handlers
                .iter()
                .for_each(|handler| handler(&leader_changed_event)),

            Event::CommitteeRefreshed(committee_refreshed_event) => self
                .committee_refreshed_handlers
                .iter()
                .for_each(|handler| handler(&committee_refreshed_event)),

            Event::CommitteeRefreshFailed(refresh_failed_event) => self
                .committee_refresh_failed_handlers
                .iter()
                .for_each(|handler| handler(&refresh_failed_event)),

            Event::ExecTask(exec_task_event) => self
                .exec_task_handlers
                .iter()
                .for_each(|handler| handler(&exec_task_event)),

            Event::SendTx(send_tx_event) => self
                .send_tx_handlers
                .iter()
                .for_each(|handler| handler(&send_tx_event)),

            Event::TickFailed(tick_failed_event) => self
                .tick_failed_handlers
                .iter()
                .for_each(|handler| handler(&tick_failed_event)),
        }
    }
}

/// Start the event bus thread. It runs until `shutdown_signal` fires (after handling every event already
/// published) or until every publisher has been dropped.
pub(crate) fn start_event_bus(
    event_handlers: EventHandlers,
    event_subscriber: Receiver<Event>,
    shutdown_signal: Receiver<()>,
) -> JoinHandle<()> {
    thread::spawn(move || loop {
        match shutdown_signal.try_recv() {
            Ok(()) | Err(TryRecvError::Disconnected) => {
                event_subscriber
                    .try_iter()
                    .for_each(|event| event_handlers.fire_handlers(event));
                return;
            }
            Err(TryRecvError::Empty) => (),
        }

        match event_subscriber.recv_timeout(EVENT_POLL_INTERVAL) {
            Ok(event) => event_handlers.fire_handlers(event),
            Err(RecvTimeoutError::Timeout) => (),
            Err(RecvTimeoutError::Disconnected) => return,
        }
    })
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{mpsc, Arc, Mutex},
        time::SystemTime,
    };

    use super::*;
    use crate::types::data_types::EpochIndex;

    #[test]
    fn user_handlers_see_published_events() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_by_handler = seen.clone();
        let handlers = EventHandlers::new(
            false,
            None,
            None,
            None,
            None,
            Some(Box::new(move |event: &ExecTaskEvent| {
                seen_by_handler.lock().unwrap().push(event.task_name.clone())
            })),
            None,
            None,
        );
        assert!(!handlers.is_empty());

        let (publisher, subscriber) = mpsc::channel();
        let (shutdown, shutdown_receiver) = mpsc::channel();
        let bus = start_event_bus(handlers, subscriber, shutdown_receiver);
        for name in ["harvest", "rebalance"] {
            Event::ExecTask(ExecTaskEvent {
                timestamp: SystemTime::now(),
                task_name: name.to_string(),
                epoch_index: EpochIndex::new(0),
                calls: 1,
                failures: 0,
            })
            .publish(&Some(publisher.clone()));
        }
        shutdown.send(()).unwrap();
        bus.join().unwrap();

        assert_eq!(*seen.lock().unwrap(), vec!["harvest", "rebalance"]);
    }

    #[test]
    fn no_handlers_without_logging() {
        let handlers = EventHandlers::new(false, None, None, None, None, None, None, None);
        assert!(handlers.is_empty());
    }
}
