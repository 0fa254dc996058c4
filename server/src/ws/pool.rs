//! Route-keyed rendezvous registry of waiting workers.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::ws::actor::Actor;

/// Workers parked by route, waiting to be paired with a client.
///
/// A single lock covers every operation; `match_with` is the only place in
/// the system where two actors become peers, so both links are always
/// established together and a matched worker can never be handed out twice.
#[derive(Default)]
pub struct WorkerPool {
    waiting: Mutex<HashMap<String, Vec<Arc<Actor>>>>,
}

impl WorkerPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Park `worker` under `route` until a client claims it.
    pub fn put(&self, route: &str, worker: Arc<Actor>) {
        let mut waiting = self.waiting.lock().expect("worker pool lock poisoned");
        waiting.entry(route.to_string()).or_default().push(worker);
    }

    /// Pair `caller` with any worker waiting on the caller's route.
    ///
    /// On success both peer links are set before the lock is released and
    /// the worker is gone from the pool. Returns false when no worker waits
    /// (or the caller has no route).
    pub fn match_with(&self, caller: &Arc<Actor>) -> bool {
        let Some(route) = caller.route() else {
            return false;
        };

        let mut waiting = self.waiting.lock().expect("worker pool lock poisoned");
        let Some(workers) = waiting.get_mut(route) else {
            return false;
        };
        let Some(worker) = workers.pop() else {
            return false;
        };
        if workers.is_empty() {
            waiting.remove(route);
        }

        caller.set_peer(&worker);
        worker.set_peer(caller);
        true
    }

    /// Remove a worker that disconnected before being matched. Identity
    /// based; a no-op if the worker was already claimed.
    pub fn evict(&self, route: &str, worker: &Arc<Actor>) -> bool {
        let mut waiting = self.waiting.lock().expect("worker pool lock poisoned");
        let Some(workers) = waiting.get_mut(route) else {
            return false;
        };
        let before = workers.len();
        workers.retain(|w| !Arc::ptr_eq(w, worker));
        let evicted = workers.len() < before;
        if workers.is_empty() {
            waiting.remove(route);
        }
        evicted
    }

    /// Number of workers waiting on `route`.
    pub fn waiting_on(&self, route: &str) -> usize {
        let waiting = self.waiting.lock().expect("worker pool lock poisoned");
        waiting.get(route).map_or(0, Vec::len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ws::actor::Actor;
    use std::net::SocketAddr;

    fn addr() -> SocketAddr {
        "127.0.0.1:9999".parse().unwrap()
    }

    fn worker(route: &str) -> Arc<Actor> {
        let (actor, _rx) = Actor::new(addr(), Some(route.to_string()), None, 4);
        actor
    }

    fn client(pool: &Arc<WorkerPool>, route: &str) -> Arc<Actor> {
        let (actor, _rx) = Actor::new(addr(), Some(route.to_string()), Some(Arc::clone(pool)), 4);
        actor
    }

    #[test]
    fn match_links_both_peers_symmetrically() {
        let pool = Arc::new(WorkerPool::new());
        let w = worker("alpha");
        pool.put("alpha", Arc::clone(&w));
        let c = client(&pool, "alpha");

        assert!(pool.match_with(&c));
        let c_peer = c.peer().expect("client should have a peer");
        let w_peer = w.peer().expect("worker should have a peer");
        assert!(Arc::ptr_eq(&c_peer, &w));
        assert!(Arc::ptr_eq(&w_peer, &c));
    }

    #[test]
    fn matched_worker_leaves_the_pool() {
        let pool = Arc::new(WorkerPool::new());
        pool.put("alpha", worker("alpha"));

        let first = client(&pool, "alpha");
        let second = client(&pool, "alpha");
        assert!(pool.match_with(&first));
        assert!(!pool.match_with(&second));
        assert_eq!(pool.waiting_on("alpha"), 0);
    }

    #[test]
    fn match_fails_on_empty_route() {
        let pool = Arc::new(WorkerPool::new());
        pool.put("alpha", worker("alpha"));
        let c = client(&pool, "beta");

        assert!(!pool.match_with(&c));
        assert!(c.peer().is_none());
        assert_eq!(pool.waiting_on("alpha"), 1);
    }

    #[test]
    fn match_takes_exactly_one_of_several_workers() {
        let pool = Arc::new(WorkerPool::new());
        let w1 = worker("gamma");
        let w2 = worker("gamma");
        pool.put("gamma", Arc::clone(&w1));
        pool.put("gamma", Arc::clone(&w2));

        let c = client(&pool, "gamma");
        assert!(pool.match_with(&c));
        assert_eq!(pool.waiting_on("gamma"), 1);

        // exactly one of the two was claimed
        let claimed = [&w1, &w2]
            .iter()
            .filter(|w| w.peer().is_some())
            .count();
        assert_eq!(claimed, 1);
    }

    #[test]
    fn evict_removes_only_the_given_worker() {
        let pool = Arc::new(WorkerPool::new());
        let w1 = worker("delta");
        let w2 = worker("delta");
        pool.put("delta", Arc::clone(&w1));
        pool.put("delta", Arc::clone(&w2));

        assert!(pool.evict("delta", &w1));
        assert!(!pool.evict("delta", &w1));
        assert_eq!(pool.waiting_on("delta"), 1);

        let c = client(&pool, "delta");
        assert!(pool.match_with(&c));
        assert!(Arc::ptr_eq(&c.peer().unwrap(), &w2));
    }
}
