//! Synchronous state machine driver.

use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;

use thiserror::Error;

/// Errors raised by the state machine. All of them are configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FsmError {
    #[error("node already registered: {0}")]
    DuplicateNode(String),

    #[error("node not registered: {0}")]
    UnknownNode(String),

    #[error("state machine is already running")]
    AlreadyRunning,
}

/// What a node wants the machine to do after one of its callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition<K> {
    /// Remain in the current node.
    Stay,
    /// Exit the current node and enter the node registered under `K`.
    ChangeTo(K),
}

/// A unit of behaviour bound to a single key.
///
/// Transitions are requested through the return value of `on_enter` and
/// `on_update`, so a node can ask for at most one per callback and never
/// from `on_exit`.
pub trait StateNode<K, C>: Send {
    /// Key this node is registered under.
    fn key(&self) -> K;

    /// Called once when the node is registered.
    fn on_create(&mut self, _ctx: &mut C) {}

    fn on_enter(&mut self, ctx: &mut C) -> Transition<K>;

    /// Called once per tick while the node is current.
    fn on_update(&mut self, _ctx: &mut C) -> Transition<K> {
        Transition::Stay
    }

    fn on_exit(&mut self, _ctx: &mut C) {}
}

/// Owns the context, the node registry and the active node.
///
/// The machine never performs I/O or waits; asynchronous work belongs to the
/// nodes, which poll it from `on_update`.
pub struct StateMachine<K, C> {
    nodes: HashMap<K, Box<dyn StateNode<K, C>>>,
    current: Option<K>,
    previous: Option<K>,
    started: bool,
    context: C,
}

impl<K, C> StateMachine<K, C>
where
    K: Copy + Eq + Hash + Debug,
{
    pub fn new(context: C) -> Self {
        Self {
            nodes: HashMap::new(),
            current: None,
            previous: None,
            started: false,
            context,
        }
    }

    /// Add a node under its key. The registry is frozen once the machine runs.
    pub fn register<N>(&mut self, mut node: N) -> Result<(), FsmError>
    where
        N: StateNode<K, C> + 'static,
    {
        if self.started {
            return Err(FsmError::AlreadyRunning);
        }

        let key = node.key();
        if self.nodes.contains_key(&key) {
            return Err(FsmError::DuplicateNode(format!("{:?}", key)));
        }

        node.on_create(&mut self.context);
        self.nodes.insert(key, Box::new(node));
        Ok(())
    }

    pub fn is_registered(&self, key: K) -> bool {
        self.nodes.contains_key(&key)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Enter the node registered under `start`.
    pub fn run(&mut self, start: K) -> Result<(), FsmError> {
        if self.started {
            return Err(FsmError::AlreadyRunning);
        }

        let node = self
            .nodes
            .get_mut(&start)
            .ok_or_else(|| FsmError::UnknownNode(format!("{:?}", start)))?;

        self.started = true;
        self.current = Some(start);
        self.previous = Some(start);
        let transition = node.on_enter(&mut self.context);
        self.settle(transition)
    }

    /// Tick the current node once. No-op before `run`.
    pub fn update(&mut self) -> Result<(), FsmError> {
        let Some(key) = self.current else {
            return Ok(());
        };
        let Some(node) = self.nodes.get_mut(&key) else {
            return Err(FsmError::UnknownNode(format!("{:?}", key)));
        };

        let transition = node.on_update(&mut self.context);
        self.settle(transition)
    }

    /// Exit the current node and enter `next`.
    pub fn change_state(&mut self, next: K) -> Result<(), FsmError> {
        let transition = self.switch_to(next)?;
        self.settle(transition)
    }

    /// Exit the current node without entering another one. The machine
    /// cannot be run again afterwards.
    pub fn halt(&mut self) {
        if let Some(key) = self.current.take() {
            if let Some(node) = self.nodes.get_mut(&key) {
                node.on_exit(&mut self.context);
            }
            self.previous = Some(key);
        }
    }

    pub fn current(&self) -> Option<K> {
        self.current
    }

    pub fn previous(&self) -> Option<K> {
        self.previous
    }

    pub fn is_running(&self) -> bool {
        self.current.is_some()
    }

    /// Whether `run` has been called, even if the machine was halted since.
    pub fn has_started(&self) -> bool {
        self.started
    }

    pub fn context(&self) -> &C {
        &self.context
    }

    pub fn context_mut(&mut self) -> &mut C {
        &mut self.context
    }

    pub fn into_context(self) -> C {
        self.context
    }

    /// Apply transitions requested by enter callbacks until a node stays.
    fn settle(&mut self, mut transition: Transition<K>) -> Result<(), FsmError> {
        while let Transition::ChangeTo(next) = transition {
            transition = self.switch_to(next)?;
        }
        Ok(())
    }

    fn switch_to(&mut self, next: K) -> Result<Transition<K>, FsmError> {
        if !self.nodes.contains_key(&next) {
            return Err(FsmError::UnknownNode(format!("{:?}", next)));
        }

        if let Some(key) = self.current {
            if let Some(node) = self.nodes.get_mut(&key) {
                node.on_exit(&mut self.context);
            }
        }

        self.previous = self.current;
        self.current = Some(next);

        match self.nodes.get_mut(&next) {
            Some(node) => Ok(node.on_enter(&mut self.context)),
            None => Err(FsmError::UnknownNode(format!("{:?}", next))),
        }
    }
}
