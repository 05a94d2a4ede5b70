//! In-memory todo storage, exposed as the `todos` plugin service.

use std::collections::BTreeMap;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Todo {
    pub id: u64,
    pub title: String,
    pub done: bool,
}

#[derive(Default)]
struct Inner {
    todos: BTreeMap<u64, Todo>,
    next_id: u64,
}

pub struct TodoStore {
    inner: Mutex<Inner>,
    max_items: usize,
}

impl TodoStore {
    pub fn new(max_items: usize) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            max_items,
        }
    }

    pub fn list(&self) -> Vec<Todo> {
        self.inner.lock().todos.values().cloned().collect()
    }

    pub fn get(&self, id: u64) -> Option<Todo> {
        self.inner.lock().todos.get(&id).cloned()
    }

    /// `None` once `max_items` todos exist.
    pub fn create(&self, title: impl Into<String>) -> Option<Todo> {
        let mut inner = self.inner.lock();
        if inner.todos.len() >= self.max_items {
            return None;
        }
        inner.next_id += 1;
        let todo = Todo {
            id: inner.next_id,
            title: title.into(),
            done: false,
        };
        inner.todos.insert(todo.id, todo.clone());
        Some(todo)
    }

    pub fn toggle(&self, id: u64) -> Option<Todo> {
        let mut inner = self.inner.lock();
        let todo = inner.todos.get_mut(&id)?;
        todo.done = !todo.done;
        Some(todo.clone())
    }

    pub fn remove(&self, id: u64) -> Option<Todo> {
        self.inner.lock().todos.remove(&id)
    }
}
