//! Protocol sessions and scoped symbol handles.
//!
//! A [`Session`] owns one connection for the duration of one variable
//! operation and closes it when dropped. A [`HandleScope`] owns one handle
//! inside a session and deletes it exactly once: explicitly through
//! [`HandleScope::release`] on the success path, or from `Drop` on every
//! other path.

use tracing::{debug, warn};

use super::{
    Connector, ControllerMode, Handle, ProtocolClient, ProtocolError, SymbolDescriptor, Target,
};

/// A single connection to one controller.
pub struct Session {
    target: Target,
    client: Box<dyn ProtocolClient>,
}

impl Session {
    /// Open a session to `target`.
    pub fn connect(connector: &dyn Connector, target: &Target) -> Result<Self, ProtocolError> {
        debug!(target = %target, backend = connector.name(), "Opening protocol session");
        let client = connector.connect(target)?;
        Ok(Self {
            target: target.clone(),
            client,
        })
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    pub fn query_mode(&mut self) -> Result<ControllerMode, ProtocolError> {
        self.client.query_mode()
    }

    pub fn resolve(&mut self, path: &str) -> Result<SymbolDescriptor, ProtocolError> {
        self.client.resolve_symbol(path)
    }

    pub fn create_handle(&mut self, path: &str) -> Result<Handle, ProtocolError> {
        self.client.create_handle(path)
    }

    pub fn delete_handle(&mut self, handle: Handle) -> Result<(), ProtocolError> {
        self.client.delete_handle(handle)
    }

    pub fn read_bytes(&mut self, handle: Handle, len: usize) -> Result<Vec<u8>, ProtocolError> {
        self.client.read_bytes(handle, len)
    }

    pub fn write_bytes(&mut self, handle: Handle, data: &[u8]) -> Result<(), ProtocolError> {
        self.client.write_bytes(handle, data)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Err(err) = self.client.close() {
            warn!(target = %self.target, error = %err, "Failed to close protocol session");
        } else {
            debug!(target = %self.target, "Protocol session closed");
        }
    }
}

/// A handle bound to one symbol, released exactly once.
pub struct HandleScope<'s> {
    session: &'s mut Session,
    handle: Handle,
    path: String,
    released: bool,
}

impl<'s> HandleScope<'s> {
    /// Create a handle for `descriptor` on `session`.
    pub fn open(
        session: &'s mut Session,
        descriptor: &SymbolDescriptor,
    ) -> Result<Self, ProtocolError> {
        let handle = session.create_handle(&descriptor.path)?;
        debug!(path = %descriptor.path, %handle, "Handle created");
        Ok(Self {
            session,
            handle,
            path: descriptor.path.clone(),
            released: false,
        })
    }

    pub fn handle(&self) -> Handle {
        self.handle
    }

    pub fn read(&mut self, len: usize) -> Result<Vec<u8>, ProtocolError> {
        self.session.read_bytes(self.handle, len)
    }

    pub fn write(&mut self, data: &[u8]) -> Result<(), ProtocolError> {
        self.session.write_bytes(self.handle, data)
    }

    /// Delete the handle and report whether the controller accepted it.
    pub fn release(mut self) -> Result<(), ProtocolError> {
        self.released = true;
        self.session.delete_handle(self.handle)?;
        debug!(path = %self.path, handle = %self.handle, "Handle released");
        Ok(())
    }
}

impl Drop for HandleScope<'_> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        match self.session.delete_handle(self.handle) {
            Ok(()) => debug!(path = %self.path, handle = %self.handle, "Handle released after failure"),
            Err(err) => warn!(
                path = %self.path,
                handle = %self.handle,
                error = %err,
                "Failed to release handle after failure"
            ),
        }
    }
}

/// Run `body` with a handle for `descriptor`, deleting the handle afterwards.
///
/// If `body` fails its error is returned and a release failure is only
/// logged. If `body` succeeds a release failure is returned instead.
pub fn with_handle<T, E, F>(
    session: &mut Session,
    descriptor: &SymbolDescriptor,
    body: F,
) -> Result<T, E>
where
    F: FnOnce(&mut HandleScope<'_>) -> Result<T, E>,
    E: From<ProtocolError>,
{
    let mut scope = HandleScope::open(session, descriptor)?;
    match body(&mut scope) {
        Ok(value) => {
            scope.release()?;
            Ok(value)
        }
        Err(err) => {
            drop(scope);
            Err(err)
        }
    }
}
