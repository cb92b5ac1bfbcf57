//! Routes inbound commands to a handler or a target queue.

use collage_wire::{Command, CommandId, CommandProducer, DataType};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// A synchronous command handler, invoked on the calling (receiver) thread
/// when no target queue is registered for the command.
///
/// Returns `true` for `COMMAND_HANDLED`, `false` for `COMMAND_DISCARD` or
/// `COMMAND_ERROR` — the two failure modes collapse to the same signal the
/// dispatcher acts on (log and continue).
///
/// `Arc` rather than `Box` so `dispatch_inner` can clone out a handle and
/// drop the routes lock before invoking it — a handler that panics on a
/// malformed command must not poison the lock for every other route.
pub type Handler = Arc<dyn Fn(&Command) -> bool + Send + Sync>;

enum Route {
    Queue(CommandProducer<Command>),
    Handler(Handler),
}

/// Maps `(datatype, commandID)` to a handler or a target queue, with
/// optional delegation to a parent dispatcher for commands this one doesn't
/// recognize (command inheritance).
pub struct Dispatcher {
    routes: Mutex<HashMap<(DataType, CommandId), Route>>,
    parent: Option<Arc<Dispatcher>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self {
            routes: Mutex::new(HashMap::new()),
            parent: None,
        }
    }

    /// Creates a dispatcher that delegates unrecognized commands to `parent`.
    pub fn with_parent(parent: Arc<Dispatcher>) -> Self {
        Self {
            routes: Mutex::new(HashMap::new()),
            parent: Some(parent),
        }
    }

    /// Registers a target queue for `(datatype, id)`. The handler for this
    /// command will run on whatever thread drains that queue.
    ///
    /// # Panics
    ///
    /// Registering the same `(datatype, id)` twice is a programming error.
    pub fn register_queue(&self, datatype: DataType, id: CommandId, queue: CommandProducer<Command>) {
        let mut routes = self.routes.lock().unwrap();
        let prev = routes.insert((datatype, id), Route::Queue(queue));
        debug_assert!(prev.is_none(), "duplicate command registration for {id:?}");
    }

    /// Registers a handler invoked synchronously, on the dispatching thread.
    ///
    /// # Panics
    ///
    /// Registering the same `(datatype, id)` twice is a programming error.
    pub fn register_handler(&self, datatype: DataType, id: CommandId, handler: Handler) {
        let mut routes = self.routes.lock().unwrap();
        let prev = routes.insert((datatype, id), Route::Handler(handler));
        debug_assert!(prev.is_none(), "duplicate command registration for {id:?}");
    }

    /// Routes `cmd`. Returns `true` if it was handled (pushed to a queue
    /// counts as handled; a pushed command that's later discarded doesn't
    /// change this return value, matching the push-and-forget contract of
    /// `CommandQueue::push`).
    pub fn dispatch(&self, cmd: Command) -> bool {
        let header = cmd.header();
        self.dispatch_inner(header.datatype, header.command, cmd)
    }

    fn dispatch_inner(&self, datatype: DataType, id: CommandId, cmd: Command) -> bool {
        let routes = self.routes.lock().unwrap();
        match routes.get(&(datatype, id)) {
            Some(Route::Queue(queue)) => queue.push(cmd),
            Some(Route::Handler(handler)) => {
                // Clone the handle and release the lock before running
                // arbitrary handler code: a panicking handler must drop a
                // command, not poison routing for every other connection.
                let handler = Arc::clone(handler);
                drop(routes);
                handler(&cmd)
            }
            None => {
                drop(routes);
                match &self.parent {
                    Some(parent) => parent.dispatch_inner(datatype, id, cmd),
                    None => {
                        eprintln!("collage-net: no route for {datatype:?}/{id:?}, dropping command");
                        false
                    }
                }
            }
        }
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}
