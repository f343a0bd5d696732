//! Deferred-update lifecycle shared by every GPU-backed object.
//!
//! A resource starts with every step pending. [`GpuResource::activate`]
//! walks the pending steps in a fixed order:
//!
//! ```text
//! needs_delete? -> delete
//! needs_create? -> create  (handle issued)
//!                  bind    (always)
//! needs_setup?  -> setup   (parameters, needs a bound object)
//! needs_update? -> update  (pending data upload, needs a bound object)
//! ```
//!
//! Each flag is cleared only after its step succeeds, so an activation that
//! fails part way is retried from the failed step on the next call.
//! [`GpuResource::delete`] releases the GPU object and puts the resource back
//! into its initial state, so the same logical object can be recreated
//! transparently.
//!
//! Views (objects sharing another object's GPU identity) implement
//! [`ResourceView`] instead. They carry no [`ResourceState`] and therefore
//! cannot create, own or delete a handle; every call goes to the base.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::backend::{Backend, Handle};
use crate::error::Result;

static NEXT_RESOURCE_ID: AtomicU64 = AtomicU64::new(1);

/// Pending lifecycle steps.
///
/// | Transition   | create | setup | update | delete |
/// |--------------|--------|-------|--------|--------|
/// | constructed  | set    | set   | set    | clear  |
/// | created      | clear  |       |        |        |
/// | set up       |        | clear |        |        |
/// | uploaded     |        |       | clear  |        |
/// | invalidated  |        |       |        | set    |
/// | deleted      | set    | set   | set    | clear  |
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Flags {
    /// No GPU object exists yet.
    pub needs_create: bool,
    /// Pending CPU-side data must be uploaded.
    pub needs_update: bool,
    /// Object parameters must be (re)applied.
    pub needs_setup: bool,
    /// The GPU object is stale and must be destroyed before the next use.
    pub needs_delete: bool,
}

impl Flags {
    /// The state of a freshly constructed (or deleted) resource.
    pub const PRISTINE: Self = Self {
        needs_create: true,
        needs_update: true,
        needs_setup: true,
        needs_delete: false,
    };
}

impl Default for Flags {
    fn default() -> Self {
        Self::PRISTINE
    }
}

/// Identity, handle and pending steps of one resource.
///
/// Invariant: `handle.is_some() == !flags.needs_create`.
#[derive(Debug)]
pub struct ResourceState {
    id: u64,
    handle: Option<Handle>,
    flags: Flags,
}

impl ResourceState {
    /// A new state with a fresh id and every step pending.
    #[must_use]
    pub fn new() -> Self {
        Self {
            id: NEXT_RESOURCE_ID.fetch_add(1, Ordering::Relaxed),
            handle: None,
            flags: Flags::PRISTINE,
        }
    }

    /// Process-unique, monotonically increasing identity.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// GPU handle, `None` until created.
    #[must_use]
    pub fn handle(&self) -> Option<Handle> {
        self.handle
    }

    /// Pending steps.
    #[must_use]
    pub fn flags(&self) -> Flags {
        self.flags
    }

    /// Request a data upload on next activation.
    pub fn invalidate_data(&mut self) {
        self.flags.needs_update = true;
    }

    /// Request parameter setup on next activation.
    pub fn invalidate_setup(&mut self) {
        self.flags.needs_setup = true;
    }

    /// Request destruction and re-creation on next activation.
    ///
    /// A resource that was never created only needs to be created, so this
    /// is a no-op for it.
    pub fn invalidate_object(&mut self) {
        if self.handle.is_some() {
            self.flags.needs_delete = true;
        }
    }
}

impl Default for ResourceState {
    fn default() -> Self {
        Self::new()
    }
}

/// A GPU object following the deferred-update lifecycle.
///
/// Implementors provide the per-step hooks; the provided methods drive them.
pub trait GpuResource {
    /// Lifecycle state.
    fn state(&self) -> &ResourceState;
    /// Mutable lifecycle state.
    fn state_mut(&mut self) -> &mut ResourceState;

    /// Create the GPU object.
    ///
    /// # Errors
    ///
    /// Driver failures; creation is never retried internally.
    fn on_create(&mut self, gl: &mut dyn Backend) -> Result<Handle>;
    /// Bind the GPU object.
    ///
    /// # Errors
    ///
    /// Failures activating dependent resources.
    fn on_bind(&mut self, gl: &mut dyn Backend, handle: Handle) -> Result<()>;
    /// Unbind the GPU object.
    fn on_unbind(&mut self, gl: &mut dyn Backend, handle: Handle);
    /// Release the GPU object.
    fn on_delete(&mut self, gl: &mut dyn Backend, handle: Handle);

    /// Apply object parameters.
    ///
    /// # Errors
    ///
    /// Driver failures.
    fn on_setup(&mut self, _gl: &mut dyn Backend, _handle: Handle) -> Result<()> {
        Ok(())
    }

    /// Upload pending data.
    ///
    /// # Errors
    ///
    /// Driver failures.
    fn on_update(&mut self, _gl: &mut dyn Backend, _handle: Handle) -> Result<()> {
        Ok(())
    }

    /// Catch up with CPU-side changes the object could not observe when
    /// they happened. Runs first on every activation, before a pending
    /// deletion.
    ///
    /// # Errors
    ///
    /// Failures recomputing derived state.
    fn on_prepare(&mut self) -> Result<()> {
        Ok(())
    }

    /// Process-unique identity.
    fn id(&self) -> u64 {
        self.state().id()
    }

    /// GPU handle, `None` until created.
    fn handle(&self) -> Option<Handle> {
        self.state().handle()
    }

    /// Pending steps.
    fn flags(&self) -> Flags {
        self.state().flags()
    }

    /// Run every pending step and leave the object bound.
    ///
    /// # Errors
    ///
    /// The first failing step's error. Steps that already succeeded stay
    /// done; the failed step stays pending.
    fn activate(&mut self, gl: &mut dyn Backend) -> Result<()> {
        self.on_prepare()?;
        if self.state().flags.needs_delete {
            self.delete(gl);
        }

        let handle = match self.state().handle {
            Some(handle) => handle,
            None => {
                let handle = self.on_create(gl)?;
                log::debug!("created GPU object {handle} (resource {})", self.id());
                let state = self.state_mut();
                state.handle = Some(handle);
                state.flags.needs_create = false;
                handle
            }
        };

        self.on_bind(gl, handle)?;

        if self.state().flags.needs_setup {
            self.on_setup(gl, handle)?;
            self.state_mut().flags.needs_setup = false;
        }

        if self.state().flags.needs_update {
            self.on_update(gl, handle)?;
            self.state_mut().flags.needs_update = false;
        }

        Ok(())
    }

    /// Unbind the object. Pending flags are left untouched.
    fn deactivate(&mut self, gl: &mut dyn Backend) {
        if let Some(handle) = self.state().handle {
            self.on_unbind(gl, handle);
        }
    }

    /// Release the GPU object and return to the constructed state.
    fn delete(&mut self, gl: &mut dyn Backend) {
        if let Some(handle) = self.state().handle {
            self.on_delete(gl, handle);
            log::debug!("deleted GPU object {handle} (resource {})", self.id());
        }
        let state = self.state_mut();
        state.handle = None;
        state.flags = Flags::PRISTINE;
    }
}

/// An object that shares the GPU identity of a base resource.
pub trait ResourceView {
    /// The owning resource type.
    type Base: GpuResource;

    /// The owning resource.
    fn base(&self) -> &Rc<RefCell<Self::Base>>;

    /// Activate the base resource.
    ///
    /// # Errors
    ///
    /// Whatever the base's activation returns.
    fn activate(&self, gl: &mut dyn Backend) -> Result<()> {
        self.base().borrow_mut().activate(gl)
    }

    /// Deactivate the base resource.
    fn deactivate(&self, gl: &mut dyn Backend) {
        self.base().borrow_mut().deactivate(gl);
    }

    /// The base resource's handle.
    fn handle(&self) -> Option<Handle> {
        self.base().borrow().handle()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::backend::{BufferTarget, Call, HeadlessBackend};

    /// Minimal resource recording which hooks ran.
    struct Probe {
        state: ResourceState,
        steps: Vec<&'static str>,
        fail_setup: bool,
    }

    impl Probe {
        fn new() -> Self {
            Self {
                state: ResourceState::new(),
                steps: Vec::new(),
                fail_setup: false,
            }
        }
    }

    impl GpuResource for Probe {
        fn state(&self) -> &ResourceState {
            &self.state
        }

        fn state_mut(&mut self) -> &mut ResourceState {
            &mut self.state
        }

        fn on_create(&mut self, gl: &mut dyn Backend) -> Result<Handle> {
            self.steps.push("create");
            gl.create_buffer()
        }

        fn on_bind(&mut self, gl: &mut dyn Backend, handle: Handle) -> Result<()> {
            self.steps.push("bind");
            gl.bind_buffer(BufferTarget::Vertex, Some(handle));
            Ok(())
        }

        fn on_unbind(&mut self, gl: &mut dyn Backend, _handle: Handle) {
            self.steps.push("unbind");
            gl.bind_buffer(BufferTarget::Vertex, None);
        }

        fn on_delete(&mut self, gl: &mut dyn Backend, handle: Handle) {
            self.steps.push("delete");
            gl.delete_buffer(handle);
        }

        fn on_setup(&mut self, _gl: &mut dyn Backend, _handle: Handle) -> Result<()> {
            self.steps.push("setup");
            if self.fail_setup {
                return Err(crate::error::Error::driver("setup", "scripted"));
            }
            Ok(())
        }

        fn on_update(&mut self, _gl: &mut dyn Backend, _handle: Handle) -> Result<()> {
            self.steps.push("update");
            Ok(())
        }
    }

    #[test]
    fn first_activation_runs_every_step_in_order() {
        let mut gl = HeadlessBackend::new();
        let mut probe = Probe::new();
        assert_eq!(probe.flags(), Flags::PRISTINE);
        assert!(probe.handle().is_none());

        probe.activate(&mut gl).unwrap();
        assert_eq!(probe.steps, ["create", "bind", "setup", "update"]);
        assert!(probe.handle().is_some());
        let flags = probe.flags();
        assert!(!flags.needs_create && !flags.needs_setup && !flags.needs_update);
    }

    #[test]
    fn reactivation_only_binds() {
        let mut gl = HeadlessBackend::new();
        let mut probe = Probe::new();
        probe.activate(&mut gl).unwrap();
        probe.deactivate(&mut gl);
        probe.steps.clear();

        probe.activate(&mut gl).unwrap();
        assert_eq!(probe.steps, ["bind"]);
    }

    #[test]
    fn deactivate_keeps_pending_flags() {
        let mut gl = HeadlessBackend::new();
        let mut probe = Probe::new();
        probe.activate(&mut gl).unwrap();
        probe.state_mut().invalidate_data();
        probe.deactivate(&mut gl);
        assert!(probe.flags().needs_update);
    }

    #[test]
    fn delete_then_activate_matches_fresh_activation() {
        let mut gl = HeadlessBackend::new();
        let mut probe = Probe::new();
        probe.activate(&mut gl).unwrap();
        let first = probe.handle().unwrap();

        probe.delete(&mut gl);
        assert_eq!(probe.flags(), Flags::PRISTINE);
        assert!(probe.handle().is_none());
        assert!(!gl.is_live(first));

        probe.steps.clear();
        probe.activate(&mut gl).unwrap();
        assert_eq!(probe.steps, ["create", "bind", "setup", "update"]);
        let second = probe.handle().unwrap();
        assert_ne!(first, second);
        assert!(gl.is_live(second));
    }

    #[test]
    fn pending_delete_recreates_on_activation() {
        let mut gl = HeadlessBackend::new();
        let mut probe = Probe::new();
        probe.activate(&mut gl).unwrap();
        let first = probe.handle().unwrap();

        probe.state_mut().invalidate_object();
        probe.steps.clear();
        probe.activate(&mut gl).unwrap();
        assert_eq!(probe.steps, ["delete", "create", "bind", "setup", "update"]);
        assert_ne!(probe.handle().unwrap(), first);
    }

    #[test]
    fn invalidate_object_before_creation_is_a_no_op() {
        let mut probe = Probe::new();
        probe.state_mut().invalidate_object();
        assert!(!probe.flags().needs_delete);
    }

    #[test]
    fn failed_step_stays_pending() {
        let mut gl = HeadlessBackend::new();
        let mut probe = Probe::new();
        probe.fail_setup = true;
        assert!(probe.activate(&mut gl).is_err());
        assert!(!probe.flags().needs_create);
        assert!(probe.flags().needs_setup);

        probe.fail_setup = false;
        probe.steps.clear();
        probe.activate(&mut gl).unwrap();
        assert_eq!(probe.steps, ["bind", "setup", "update"]);
    }

    #[test]
    fn creation_failure_is_fatal() {
        let mut gl = HeadlessBackend::new();
        gl.lose_context();
        let mut probe = Probe::new();
        let err = probe.activate(&mut gl).unwrap_err();
        assert!(matches!(err, crate::error::Error::Driver { .. }));
        assert!(probe.handle().is_none());
        assert!(probe.flags().needs_create);
    }

    #[test]
    fn ids_increase() {
        let a = ResourceState::new();
        let b = ResourceState::new();
        assert!(b.id() > a.id());
    }

    #[test]
    fn view_delegates_to_base() {
        struct ProbeView(Rc<RefCell<Probe>>);
        impl ResourceView for ProbeView {
            type Base = Probe;
            fn base(&self) -> &Rc<RefCell<Probe>> {
                &self.0
            }
        }

        let mut gl = HeadlessBackend::new();
        let base = Rc::new(RefCell::new(Probe::new()));
        let view = ProbeView(Rc::clone(&base));
        assert!(view.handle().is_none());

        view.activate(&mut gl).unwrap();
        assert_eq!(view.handle(), base.borrow().handle());
        let creates = gl
            .calls()
            .iter()
            .filter(|c| matches!(c, Call::CreateBuffer(_)))
            .count();
        assert_eq!(creates, 1);
    }
}
