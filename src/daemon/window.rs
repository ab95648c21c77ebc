//! Window-manager client
//!
//! Every window-manager method answers with an `i32` status where zero
//! means the request was refused, except the list and query methods.

use crate::bus::{ArgReader, BusConnection, BusMessage};
use crate::config::ServiceAddress;
use crate::daemon::{invoke, method_call};
use crate::error::{Error, Result};

pub const METHOD_WINDOW_LIST: &str = "WindowList";
pub const METHOD_SET_LOCK: &str = "SetLock";
pub const METHOD_FOCUS_PID: &str = "FocusPID";
pub const METHOD_FOCUS_ID: &str = "FocusID";
pub const METHOD_MINIMIZE_PID: &str = "MinimizePID";
pub const METHOD_MINIMIZE_ID: &str = "MinimizeID";
pub const METHOD_SCREEN_DIMENSIONS: &str = "ScreenDimensions";
pub const METHOD_SET_WINDOW_PRIORITY: &str = "SetWindowPriority";
pub const METHOD_MOVE_RESIZE: &str = "MoveResizeWindow";
pub const METHOD_FULLSCREEN: &str = "FullScreenWindow";
pub const METHOD_TOGGLE_FULLSCREEN: &str = "ToggleFullscreen";
pub const METHOD_TOP_WINDOW: &str = "TopWindow";

/// A window known to the window manager
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowInfo {
    pub title: String,
    pub icon: String,
    pub pid: i32,
    pub window_id: i32,
}

/// Target position and size of a window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowGeometry {
    pub window_id: i32,
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

/// Client of the window manager
pub struct WindowManagerProxy<'a, C: BusConnection> {
    connection: &'a C,
    address: &'a ServiceAddress,
}

impl<'a, C: BusConnection> WindowManagerProxy<'a, C> {
    pub fn new(connection: &'a C, address: &'a ServiceAddress) -> Self {
        Self {
            connection,
            address,
        }
    }

    /// Windows currently managed, in the window manager's order
    pub async fn window_list(&self) -> Result<Vec<WindowInfo>> {
        let call = method_call(self.address, METHOD_WINDOW_LIST)?;
        let reply = invoke(self.connection, call).await?;
        let mut reader = reply.reader();

        let count = reader.read_i32()?;
        if count <= 0 {
            return Ok(Vec::new());
        }
        let entries = reader.read_array()?;
        if entries.len() < count as usize {
            return Err(Error::InvalidArgument(format!(
                "window list announces {count} windows but carries {}",
                entries.len()
            )));
        }

        let mut items = ArgReader::new(&entries[..count as usize]);
        let mut windows = Vec::with_capacity(count as usize);
        while items.remaining() > 0 {
            let mut fields = items.read_struct()?;
            windows.push(WindowInfo {
                title: fields.read_str()?.to_string(),
                icon: fields.read_str()?.to_string(),
                pid: fields.read_i32()?,
                window_id: fields.read_i32()?,
            });
        }
        Ok(windows)
    }

    /// Take the screen lock for `pid`
    pub async fn lock_screen(&self, pid: i32) -> Result<()> {
        self.status_call("lock screen", METHOD_SET_LOCK, |m| m.arg(pid).arg(1u32))
            .await
    }

    pub async fn unlock_screen(&self, pid: i32) -> Result<()> {
        self.status_call("unlock screen", METHOD_SET_LOCK, |m| m.arg(pid).arg(0u32))
            .await
    }

    /// Bring the windows of `pid` to the front
    pub async fn focus_pid(&self, pid: i32) -> Result<()> {
        self.status_call("focus pid", METHOD_FOCUS_PID, |m| m.arg(pid))
            .await
    }

    /// Ask for the windows of `pid` to be raised without waiting for an answer
    pub fn raise_pid(&self, pid: i32) -> Result<()> {
        let call = method_call(self.address, METHOD_FOCUS_PID)?.arg(pid);
        self.connection.send(call)?;
        Ok(())
    }

    pub async fn focus_window(&self, window_id: i32) -> Result<()> {
        self.status_call("focus window", METHOD_FOCUS_ID, |m| m.arg(window_id))
            .await
    }

    pub async fn minimize_pid(&self, pid: i32) -> Result<()> {
        self.status_call("minimize pid", METHOD_MINIMIZE_PID, |m| m.arg(pid))
            .await
    }

    pub async fn minimize_window(&self, window_id: i32) -> Result<()> {
        self.status_call("minimize window", METHOD_MINIMIZE_ID, |m| m.arg(window_id))
            .await
    }

    /// Available screen area as `(width, height)`
    pub async fn screen_dimensions(&self) -> Result<(i32, i32)> {
        let call = method_call(self.address, METHOD_SCREEN_DIMENSIONS)?;
        let reply = invoke(self.connection, call).await?;
        let mut reader = reply.reader();
        Ok((reader.read_i32()?, reader.read_i32()?))
    }

    pub async fn set_window_priority(&self, window_id: i32, priority: i32) -> Result<()> {
        self.status_call("set window priority", METHOD_SET_WINDOW_PRIORITY, |m| {
            m.arg(window_id).arg(priority)
        })
        .await
    }

    pub async fn move_resize(&self, geometry: WindowGeometry) -> Result<()> {
        self.status_call("move resize", METHOD_MOVE_RESIZE, |m| {
            m.arg(geometry.window_id)
                .arg(geometry.x)
                .arg(geometry.y)
                .arg(geometry.width)
                .arg(geometry.height)
        })
        .await
    }

    pub async fn set_fullscreen(&self, window_id: i32, fullscreen: bool) -> Result<()> {
        self.status_call("fullscreen", METHOD_FULLSCREEN, |m| {
            m.arg(window_id).arg(i32::from(fullscreen))
        })
        .await
    }

    /// Toggle fullscreen on the focused window
    pub async fn toggle_fullscreen(&self) -> Result<()> {
        self.status_call("toggle fullscreen", METHOD_TOGGLE_FULLSCREEN, |m| m)
            .await
    }

    /// Title of the topmost window of `pid`
    pub async fn top_window(&self, pid: i32) -> Result<String> {
        let call = method_call(self.address, METHOD_TOP_WINDOW)?.arg(pid);
        let reply = invoke(self.connection, call).await?;
        let title = reply.reader().read_str()?.to_string();
        Ok(title)
    }

    async fn status_call(
        &self,
        operation: &'static str,
        member: &str,
        args: impl FnOnce(BusMessage) -> BusMessage,
    ) -> Result<()> {
        let call = args(method_call(self.address, member)?);
        let reply = invoke(self.connection, call).await?;
        match reply.reader().read_i32()? {
            0 => Err(Error::Daemon { operation, code: 0 }),
            _ => Ok(()),
        }
    }
}
