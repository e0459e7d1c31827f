//! # Application Registry
//!
//! Name → entry point table of the applications the firmware can start by
//! name (from a console, a boot script, or another task). Applications are
//! registered explicitly at startup, before or after `kernel::init`; the
//! registry never relies on linker-section placement.

use heapless::Vec;

use crate::config::{DEFAULT_STACK_SIZE, MAX_APPS};
use crate::error::{KernelError, KernelResult};
use crate::task::TaskEntry;

/// A startable application.
#[derive(Clone, Copy)]
pub struct App {
    pub name: &'static str,
    pub entry: TaskEntry,
    pub priority: u8,
    pub stack_size: usize,
}

impl App {
    /// An application with the default stack size.
    pub const fn new(name: &'static str, entry: TaskEntry, priority: u8) -> Self {
        Self {
            name,
            entry,
            priority,
            stack_size: DEFAULT_STACK_SIZE,
        }
    }

    pub const fn with_stack_size(mut self, stack_size: usize) -> Self {
        self.stack_size = stack_size;
        self
    }
}

/// Fixed-capacity set of registered applications.
pub struct AppRegistry {
    apps: Vec<App, MAX_APPS>,
}

impl AppRegistry {
    pub const fn new() -> Self {
        Self { apps: Vec::new() }
    }

    /// Add an application.
    ///
    /// # Errors
    /// - [`KernelError::Access`] if the name is already registered.
    /// - [`KernelError::NoMemory`] if the registry is full.
    pub fn register(&mut self, app: App) -> KernelResult<()> {
        if self.lookup(app.name).is_some() {
            return Err(KernelError::Access);
        }
        self.apps.push(app).map_err(|_| KernelError::NoMemory)?;
        log::debug!("app '{}' registered", app.name);
        Ok(())
    }

    pub fn lookup(&self, name: &str) -> Option<&App> {
        self.apps.iter().find(|app| app.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &App> {
        self.apps.iter()
    }

    pub fn len(&self) -> usize {
        self.apps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.apps.is_empty()
    }
}

impl Default for AppRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::entry;

    #[test]
    fn test_register_and_lookup() {
        let mut apps = AppRegistry::new();
        apps.register(App::new("blink", entry, 8)).unwrap();
        let shell = App::new("shell", entry, 10).with_stack_size(2048);
        apps.register(shell).unwrap();

        let shell = apps.lookup("shell").unwrap();
        assert_eq!(shell.priority, 10);
        assert_eq!(shell.stack_size, 2048);
        assert_eq!(apps.lookup("blink").unwrap().stack_size, DEFAULT_STACK_SIZE);
        assert!(apps.lookup("missing").is_none());
        assert_eq!(apps.len(), 2);
    }

    #[test]
    fn test_duplicate_and_full() {
        const NAMES: [&str; MAX_APPS] = [
            "a0", "a1", "a2", "a3", "a4", "a5", "a6", "a7", "a8", "a9", "a10", "a11", "a12",
            "a13", "a14", "a15",
        ];
        let mut apps = AppRegistry::new();
        for name in NAMES {
            apps.register(App::new(name, entry, 5)).unwrap();
        }
        assert_eq!(
            apps.register(App::new("a0", entry, 5)),
            Err(KernelError::Access)
        );
        assert_eq!(
            apps.register(App::new("extra", entry, 5)),
            Err(KernelError::NoMemory)
        );
    }
}
