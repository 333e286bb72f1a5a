//! Controller events, and the queue that carries them to the stack task
//!
//! The controller's interrupt handler produces [`Event`]s; the single stack
//! task consumes them in order. Class drivers may also post *deferred*
//! completions back onto the same queue to be called again later, without
//! blocking the task. See [`Context::defer`](crate::Context::defer).

use crate::{dcd::Speed, dcd::XferResult, Error, Result};
use core::cell::RefCell;
use cortex_m::interrupt::{self, Mutex};
use heapless::Deque;
use usb_device::endpoint::EndpointAddress;

/// Default event queue depth
pub const DEFAULT_QUEUE_SIZE: usize = 16;

/// A transfer completion
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Completion {
    /// The endpoint that completed a transfer.
    pub ep: EndpointAddress,
    /// Number of bytes transferred.
    pub len: usize,
    /// Transfer status.
    pub result: XferResult,
    /// `true` if a class driver posted this completion for itself.
    ///
    /// Deferred completions never carry bytes from the controller. Any data
    /// they describe is already in the class driver's own buffer.
    pub deferred: bool,
}

impl Completion {
    /// A successful completion reported by the controller
    pub const fn new(ep: EndpointAddress, len: usize) -> Self {
        Completion {
            ep,
            len,
            result: XferResult::Success,
            deferred: false,
        }
    }
}

/// A controller event
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Event {
    /// The host reset the bus.
    BusReset(Speed),
    /// VBUS was removed.
    Unplugged,
    /// The bus was idle long enough to suspend.
    Suspend,
    /// The bus resumed.
    Resume,
    /// A SETUP packet arrived on EP0.
    Setup([u8; 8]),
    /// A transfer completed.
    XferComplete(Completion),
}

impl Event {
    fn is_control_completion(&self) -> bool {
        matches!(self, Event::XferComplete(completion) if completion.ep.index() == 0)
    }
}

/// A fixed-capacity FIFO of events
///
/// `N` sets the capacity. Events are never reordered.
pub struct EventQueue<const N: usize = DEFAULT_QUEUE_SIZE> {
    events: Deque<Event, N>,
}

impl<const N: usize> Default for EventQueue<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> EventQueue<N> {
    /// Create an empty queue
    pub const fn new() -> Self {
        EventQueue {
            events: Deque::new(),
        }
    }

    /// Append an event
    ///
    /// Returns [`Error::QueueFull`] if there's no space. The event is dropped.
    pub fn push(&mut self, event: Event) -> Result<()> {
        self.events.push_back(event).map_err(|_| {
            warn!("EVENT QUEUE FULL");
            Error::QueueFull
        })
    }

    /// Remove the oldest event
    pub fn pop(&mut self) -> Option<Event> {
        self.events.pop_front()
    }

    /// Returns the number of queued events
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Indicates if there are no queued events
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Returns the queue capacity
    pub const fn capacity(&self) -> usize {
        N
    }

    /// Keep only the events for which `keep` returns `true`
    pub fn retain(&mut self, mut keep: impl FnMut(&Event) -> bool) {
        for _ in 0..self.events.len() {
            if let Some(event) = self.events.pop_front() {
                if keep(&event) {
                    // Can't fail; we just made room.
                    let _ = self.events.push_back(event);
                }
            }
        }
    }

    /// Indicates if a SETUP packet is waiting in the queue
    pub(crate) fn has_setup(&self) -> bool {
        self.events
            .iter()
            .any(|event| matches!(event, Event::Setup(_)))
    }

    /// Drop every queued EP0 completion
    ///
    /// Called when a SETUP packet supersedes the control transfer those
    /// completions belonged to.
    pub(crate) fn purge_control_completions(&mut self) {
        self.retain(|event| !event.is_control_completion());
    }
}

/// An event queue that an interrupt handler can share with the stack task
///
/// Allocate a `static` queue, push from the USB interrupt handler, and drain
/// it into the device with [`Device::poll`](crate::Device::poll).
///
/// ```
/// use usbd_stack::IsrQueue;
///
/// static EVENTS: IsrQueue = IsrQueue::new();
/// ```
pub struct IsrQueue<const N: usize = DEFAULT_QUEUE_SIZE> {
    queue: Mutex<RefCell<EventQueue<N>>>,
}

impl<const N: usize> IsrQueue<N> {
    /// Create an empty queue
    pub const fn new() -> Self {
        IsrQueue {
            queue: Mutex::new(RefCell::new(EventQueue::new())),
        }
    }

    /// Interrupt-safe push
    pub fn push(&self, event: Event) -> Result<()> {
        interrupt::free(|cs| self.queue.borrow(cs).borrow_mut().push(event))
    }

    /// Move every queued event into `dst`, in order
    ///
    /// Events that don't fit in `dst` stay in this queue.
    pub fn drain_into<const M: usize>(&self, dst: &mut EventQueue<M>) {
        interrupt::free(|cs| {
            let mut queue = self.queue.borrow(cs).borrow_mut();
            while dst.len() < dst.capacity() {
                match queue.pop() {
                    Some(event) => {
                        // Can't fail; checked capacity above.
                        let _ = dst.push(event);
                    }
                    None => break,
                }
            }
        });
    }
}

impl<const N: usize> Default for IsrQueue<N> {
    fn default() -> Self {
        Self::new()
    }
}
