// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 KylinSoft Co., Ltd. <https://www.kylinos.cn/>
// See LICENSES for license details.

//! Completion delivery.
//!
//! The interrupt path only appends to a [`CompletionQueue`]; the caller
//! drains it from its own context, so upstream processing never runs on the
//! reactor.

use alloc::{collections::VecDeque, vec::Vec};

use event_listener::{Event, EventListener};
use spin::Mutex;

use crate::desc::DescErrors;

/// Outcome of one buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionStatus {
    /// Transferred without error.
    Ok,
    /// The device reported a per-packet error.
    HardwareError(DescErrors),
    /// Returned unused during teardown.
    Cancelled,
}

impl CompletionStatus {
    pub(crate) fn from_errors(errors: DescErrors) -> Self {
        if errors.is_empty() {
            CompletionStatus::Ok
        } else {
            CompletionStatus::HardwareError(errors)
        }
    }

    /// Whether the buffer was transferred without error.
    pub fn is_ok(&self) -> bool {
        matches!(self, CompletionStatus::Ok)
    }
}

/// A transmitted (or cancelled) packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxCompletion {
    pub buffer_id: u32,
    pub status: CompletionStatus,
}

/// A filled (or returned) receive space buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RxCompletion {
    pub buffer_id: u32,
    /// Bytes the device wrote, 0 for a cancelled buffer.
    pub length: usize,
    /// Whether this buffer ends a frame; frames larger than one space
    /// buffer span several completions.
    pub end_of_frame: bool,
    pub status: CompletionStatus,
}

/// An ordered queue of completions with a wake-up event.
pub struct CompletionQueue<T> {
    queue: Mutex<VecDeque<T>>,
    event: Event,
}

impl<T> Default for CompletionQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> CompletionQueue<T> {
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            event: Event::new(),
        }
    }

    /// Appends `items` in order and wakes every listener. Returns how many
    /// were appended.
    pub fn push_all(&self, items: impl IntoIterator<Item = T>) -> usize {
        let count = {
            let mut queue = self.queue.lock();
            let before = queue.len();
            queue.extend(items);
            queue.len() - before
        };
        if count != 0 {
            self.event.notify(usize::MAX);
        }
        count
    }

    /// Takes the oldest completion.
    pub fn try_pop(&self) -> Option<T> {
        self.queue.lock().pop_front()
    }

    /// Takes every queued completion, oldest first.
    pub fn drain(&self) -> Vec<T> {
        self.queue.lock().drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }

    /// Returns a listener that fires on the next [`push_all`](Self::push_all).
    ///
    /// Check the queue after creating the listener and before awaiting it,
    /// or a completion pushed in between is missed until the next one.
    pub fn listen(&self) -> EventListener {
        self.event.listen()
    }
}
