//! Minimal discrete event simulation kernel
//!
//! Agents react to timestamped events popped from a min-time queue. Each
//! reaction may schedule further events and spawn further agents. Once the
//! run is over every agent reports a statistics value of type `S`.
//!
//! The [`parallel`] module dispatches many independent simulations onto a
//! thread pool.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

pub mod parallel;

struct Event<T> {
    t: usize,
    seq: usize,
    data: T,
}

impl<T> PartialEq for Event<T> {
    fn eq(&self, other: &Self) -> bool {
        self.t == other.t && self.seq == other.seq
    }
}

impl<T> Eq for Event<T> {}

impl<T> Ord for Event<T> {
    // Reversed so the BinaryHeap pops the earliest event first; ties keep
    // scheduling order.
    fn cmp(&self, other: &Self) -> Ordering {
        other.t.cmp(&self.t).then_with(|| other.seq.cmp(&self.seq))
    }
}

impl<T> PartialOrd for Event<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// What an agent hands back after reacting to an event
pub struct Response<T, S> {
    pub events: Vec<(usize, T)>,
    pub agents: Vec<Box<dyn Agent<T, S>>>,
}

impl<T, S> Response<T, S> {
    pub fn new() -> Response<T, S> {
        Response {
            events: Vec::new(),
            agents: Vec::new(),
        }
    }

    /// Schedule a single event
    pub fn event(t: usize, data: T) -> Response<T, S> {
        Response {
            events: vec![(t, data)],
            agents: Vec::new(),
        }
    }

    /// Schedule several events
    pub fn events(events: Vec<(usize, T)>) -> Response<T, S> {
        Response {
            events,
            agents: Vec::new(),
        }
    }
}

impl<T, S> Default for Response<T, S> {
    fn default() -> Self {
        Response::new()
    }
}

pub trait Agent<T, S> {
    fn act(&mut self, _current_t: usize, _data: &T) -> Response<T, S> {
        Response::new()
    }

    fn stats(&self) -> S;
}

pub struct EventLoop<T, S> {
    queue: BinaryHeap<Event<T>>,
    current_t: usize,
    next_seq: usize,
    agents: Vec<Box<dyn Agent<T, S>>>,
}

impl<T, S> EventLoop<T, S> {
    pub fn new(events: Vec<(usize, T)>, agents: Vec<Box<dyn Agent<T, S>>>) -> EventLoop<T, S> {
        let mut event_loop = EventLoop {
            queue: BinaryHeap::with_capacity(events.len()),
            current_t: 0,
            next_seq: 0,
            agents,
        };
        for (t, data) in events {
            event_loop.schedule(t, data);
        }
        event_loop
    }

    fn schedule(&mut self, t: usize, data: T) {
        self.queue.push(Event {
            t,
            seq: self.next_seq,
            data,
        });
        self.next_seq += 1;
    }

    fn broadcast(&mut self) {
        let Some(event) = self.queue.pop() else {
            return;
        };
        self.current_t = event.t;

        let mut scheduled = Vec::new();
        let mut spawned = Vec::new();
        for agent in &mut self.agents {
            let response = agent.act(self.current_t, &event.data);
            scheduled.extend(response.events);
            spawned.extend(response.agents);
        }

        for (t, data) in scheduled {
            // Events cannot be scheduled in the past
            if t >= self.current_t {
                self.schedule(t, data);
            }
        }
        self.agents.extend(spawned);
    }

    /// Process every event with a timestamp no later than `until`
    pub fn run(&mut self, until: usize) {
        while let Some(next) = self.queue.peek() {
            if next.t > until {
                break;
            }
            self.broadcast();
        }
    }

    pub fn current_t(&self) -> usize {
        self.current_t
    }

    pub fn stats(&self) -> Vec<S> {
        self.agents.iter().map(|agent| agent.stats()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Ticker {
        ticks: usize,
        every: usize,
    }

    impl Agent<usize, usize> for Ticker {
        fn act(&mut self, current_t: usize, data: &usize) -> Response<usize, usize> {
            self.ticks += 1;
            Response::event(current_t + self.every, data + 1)
        }

        fn stats(&self) -> usize {
            self.ticks
        }
    }

    #[test]
    fn min_queue() {
        let mut queue = BinaryHeap::<Event<u8>>::new();
        queue.push(Event {
            t: 2,
            seq: 0,
            data: 2,
        });
        queue.push(Event {
            t: 1,
            seq: 1,
            data: 1,
        });
        assert_eq!(queue.peek().map(|e| e.data), Some(1));
    }

    #[test]
    fn same_time_events_keep_schedule_order() {
        let mut queue = BinaryHeap::<Event<u8>>::new();
        for (seq, data) in [7, 8, 9].into_iter().enumerate() {
            queue.push(Event { t: 3, seq, data });
        }
        let order: Vec<u8> = std::iter::from_fn(|| queue.pop().map(|e| e.data)).collect();
        assert_eq!(order, vec![7, 8, 9]);
    }

    #[test]
    fn run_stops_at_horizon() {
        let agents: Vec<Box<dyn Agent<usize, usize>>> =
            vec![Box::new(Ticker { ticks: 0, every: 1 })];
        let mut event_loop = EventLoop::new(vec![(0, 0)], agents);

        event_loop.run(9);

        assert_eq!(event_loop.stats(), vec![10]);
        assert_eq!(event_loop.current_t(), 9);
    }

    #[test]
    fn spawned_agents_join_the_loop() {
        struct Spawner;
        impl Agent<usize, usize> for Spawner {
            fn act(&mut self, _current_t: usize, _data: &usize) -> Response<usize, usize> {
                Response {
                    events: Vec::new(),
                    agents: vec![Box::new(Ticker { ticks: 0, every: 5 })],
                }
            }

            fn stats(&self) -> usize {
                0
            }
        }

        let agents: Vec<Box<dyn Agent<usize, usize>>> = vec![Box::new(Spawner)];
        let mut event_loop = EventLoop::new(vec![(1, 0), (2, 0)], agents);
        event_loop.run(2);

        // First event: 1 new agent; second event: the spawner and that agent act
        assert_eq!(event_loop.stats().len(), 3);
    }

    #[test]
    fn past_events_are_dropped() {
        struct Backwards;
        impl Agent<usize, usize> for Backwards {
            fn act(&mut self, _current_t: usize, _data: &usize) -> Response<usize, usize> {
                Response::event(0, 0)
            }

            fn stats(&self) -> usize {
                0
            }
        }

        let agents: Vec<Box<dyn Agent<usize, usize>>> = vec![Box::new(Backwards)];
        let mut event_loop = EventLoop::new(vec![(5, 0)], agents);
        event_loop.run(100);

        assert_eq!(event_loop.current_t(), 5);
    }
}
