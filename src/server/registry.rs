// src/server/registry.rs

use crate::constants::CONTEXT_MANAGER_HANDLE;
use crate::server::session::ServerSession;
use crate::status::Status;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

struct RegistryState {
  next_object_handle: u64,
  context_manager: Option<Arc<ServerSession>>,
  monitor: Option<Arc<ServerSession>>,
  handles: HashMap<u64, Arc<ServerSession>>,
  references: HashMap<u64, Vec<Arc<ServerSession>>>,
}

/// Broker-wide table of object handles, the sessions that own them and the
/// sessions holding references to them.
///
/// The registry never calls into a session while its own lock is held;
/// sessions may call into the registry while holding theirs.
pub struct Registry {
  state: Mutex<RegistryState>,
}

impl Default for Registry {
  fn default() -> Self {
    Self::with_first_handle(1)
  }
}

impl Registry {
  pub fn new() -> Self {
    Self::default()
  }

  pub(crate) fn with_first_handle(first: u64) -> Self {
    Self {
      state: Mutex::new(RegistryState {
        next_object_handle: first.max(1),
        context_manager: None,
        monitor: None,
        handles: HashMap::new(),
        references: HashMap::new(),
      }),
    }
  }

  /// Claims the context-manager role for `session` if nobody holds it.
  pub fn set_context_manager(&self, session: &Arc<ServerSession>) -> Result<(), Status> {
    let mut state = self.state.lock();
    if state.context_manager.is_some() {
      return Err(Status::AlreadyExists);
    }
    state.context_manager = Some(session.clone());
    tracing::debug!(session_id = session.id(), "Context manager registered");
    Ok(())
  }

  pub fn context_manager(&self) -> Option<Arc<ServerSession>> {
    self.state.lock().context_manager.clone()
  }

  /// Drops the context-manager role if `session_id` holds it.
  pub fn clear_context_manager(&self, session_id: u64) {
    let mut state = self.state.lock();
    if state.context_manager.as_ref().map(|s| s.id()) == Some(session_id) {
      state.context_manager = None;
      tracing::debug!(session_id = session_id, "Context manager released");
    }
  }

  pub fn set_monitor(&self, session: &Arc<ServerSession>) -> Result<(), Status> {
    let mut state = self.state.lock();
    if state.monitor.is_some() {
      return Err(Status::AlreadyExists);
    }
    state.monitor = Some(session.clone());
    tracing::debug!(session_id = session.id(), "Monitor registered");
    Ok(())
  }

  pub fn monitor(&self) -> Option<Arc<ServerSession>> {
    self.state.lock().monitor.clone()
  }

  pub fn clear_monitor(&self, session_id: u64) {
    let mut state = self.state.lock();
    if state.monitor.as_ref().map(|s| s.id()) == Some(session_id) {
      state.monitor = None;
    }
  }

  /// Session owning `handle`. Handle 0 resolves to the context manager.
  pub fn find_session_by_handle(&self, handle: u64) -> Option<Arc<ServerSession>> {
    let state = self.state.lock();
    if handle == CONTEXT_MANAGER_HANDLE {
      return state.context_manager.clone();
    }
    state.handles.get(&handle).cloned()
  }

  /// Assigns the next handle to an object owned by `session`.
  ///
  /// Handles are never reused; once the counter is exhausted this fails
  /// with `NoMemory`.
  pub fn new_object_handle(&self, session: &Arc<ServerSession>) -> Result<u64, Status> {
    let mut state = self.state.lock();
    let handle = state.next_object_handle;
    state.next_object_handle = handle.checked_add(1).ok_or_else(|| {
      tracing::error!("Object handle space exhausted");
      Status::NoMemory
    })?;
    state.handles.insert(handle, session.clone());
    tracing::trace!(handle = handle, session_id = session.id(), "New object handle");
    Ok(handle)
  }

  /// Forgets `handle` and tells every session that referenced it that the
  /// object is gone. Each referencing session is notified once.
  pub fn remove_handle(&self, handle: u64) {
    let notify = {
      let mut state = self.state.lock();
      if state.handles.remove(&handle).is_none() {
        tracing::warn!(handle = handle, "Cannot remove unknown handle");
        return;
      }
      let mut sessions = state.references.remove(&handle).unwrap_or_default();
      sessions.sort_by_key(|s| s.id());
      sessions.dedup_by_key(|s| s.id());
      sessions
    };
    for session in notify {
      session.send_death_notification(handle);
    }
  }

  pub fn is_handle_known(&self, handle: u64) -> bool {
    self.state.lock().handles.contains_key(&handle)
  }

  pub fn is_handle_referenced(&self, handle: u64) -> bool {
    self.state.lock().references.get(&handle).is_some_and(|refs| !refs.is_empty())
  }

  pub fn reference_count(&self, handle: u64) -> usize {
    self.state.lock().references.get(&handle).map_or(0, Vec::len)
  }

  pub fn add_reference_for_handle(&self, session: &Arc<ServerSession>, handle: u64) -> Result<(), Status> {
    let mut state = self.state.lock();
    if !state.handles.contains_key(&handle) {
      return Err(Status::DeadObject);
    }
    state.references.entry(handle).or_default().push(session.clone());
    Ok(())
  }

  pub fn remove_reference_for_handle(&self, session: &Arc<ServerSession>, handle: u64) -> Result<(), Status> {
    let mut state = self.state.lock();
    if !state.handles.contains_key(&handle) {
      return Err(Status::DeadObject);
    }
    let refs = state.references.get_mut(&handle).ok_or(Status::BadValue)?;
    let index = refs.iter().position(|s| s.id() == session.id()).ok_or(Status::BadValue)?;
    refs.remove(index);
    if refs.is_empty() {
      state.references.remove(&handle);
    }
    Ok(())
  }

  /// Drops every reference `session_id` holds on other sessions' handles.
  pub fn drop_session_references(&self, session_id: u64) {
    let mut state = self.state.lock();
    state.references.retain(|_, refs| {
      refs.retain(|s| s.id() != session_id);
      !refs.is_empty()
    });
  }

  pub fn handle_count(&self) -> usize {
    self.state.lock().handles.len()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn session(registry: &Arc<Registry>) -> Arc<ServerSession> {
    ServerSession::new(registry.clone()).0
  }

  #[test]
  fn handles_start_at_one_and_resolve_to_owner() {
    let registry = Arc::new(Registry::new());
    let a = session(&registry);
    let h1 = registry.new_object_handle(&a).unwrap();
    let h2 = registry.new_object_handle(&a).unwrap();
    assert_eq!((h1, h2), (1, 2));
    assert_eq!(registry.find_session_by_handle(h1).map(|s| s.id()), Some(a.id()));
    assert!(registry.find_session_by_handle(0).is_none());
    assert!(registry.find_session_by_handle(77).is_none());
  }

  #[test]
  fn context_manager_is_exclusive() {
    let registry = Arc::new(Registry::new());
    let a = session(&registry);
    let b = session(&registry);
    registry.set_context_manager(&a).unwrap();
    assert_eq!(registry.set_context_manager(&b), Err(Status::AlreadyExists));
    assert_eq!(registry.find_session_by_handle(0).map(|s| s.id()), Some(a.id()));

    registry.clear_context_manager(b.id());
    assert!(registry.context_manager().is_some());
    registry.clear_context_manager(a.id());
    registry.set_context_manager(&b).unwrap();
  }

  #[test]
  fn references_require_a_live_handle() {
    let registry = Arc::new(Registry::new());
    let owner = session(&registry);
    let user = session(&registry);
    let handle = registry.new_object_handle(&owner).unwrap();

    assert_eq!(registry.add_reference_for_handle(&user, 99), Err(Status::DeadObject));
    assert_eq!(registry.remove_reference_for_handle(&user, handle), Err(Status::BadValue));
    registry.add_reference_for_handle(&user, handle).unwrap();
    assert!(registry.is_handle_referenced(handle));
    assert_eq!(registry.remove_reference_for_handle(&owner, handle), Err(Status::BadValue));
    registry.remove_reference_for_handle(&user, handle).unwrap();
    assert!(!registry.is_handle_referenced(handle));

    registry.add_reference_for_handle(&user, handle).unwrap();
    registry.remove_handle(handle);
    assert!(!registry.is_handle_known(handle));
    assert!(!registry.is_handle_referenced(handle));
    assert_eq!(registry.remove_reference_for_handle(&user, handle), Err(Status::DeadObject));
  }

  #[test]
  fn exhausted_counter_reports_no_memory() {
    let registry = Arc::new(Registry::with_first_handle(u64::MAX));
    let a = session(&registry);
    assert_eq!(registry.new_object_handle(&a), Err(Status::NoMemory));
    assert_eq!(registry.handle_count(), 0);
  }

  #[test]
  fn concurrent_sessions_get_distinct_handles() {
    const THREADS: usize = 8;
    const PER_THREAD: usize = 200;
    let registry = Arc::new(Registry::new());
    let user = session(&registry);

    let workers: Vec<_> = (0..THREADS)
      .map(|_| {
        let registry = registry.clone();
        let user = user.clone();
        std::thread::spawn(move || {
          let owner = session(&registry);
          let mut minted = Vec::with_capacity(PER_THREAD);
          for _ in 0..PER_THREAD {
            let handle = registry.new_object_handle(&owner).unwrap();
            registry.add_reference_for_handle(&user, handle).unwrap();
            registry.add_reference_for_handle(&owner, handle).unwrap();
            registry.remove_reference_for_handle(&user, handle).unwrap();
            minted.push(handle);
          }
          minted
        })
      })
      .collect();

    let mut all: Vec<u64> = workers.into_iter().flat_map(|w| w.join().unwrap()).collect();
    all.sort_unstable();
    all.dedup();
    assert_eq!(all.len(), THREADS * PER_THREAD);
    assert_eq!(registry.handle_count(), THREADS * PER_THREAD);
    assert!(all.iter().all(|h| registry.reference_count(*h) == 1));
  }
}
