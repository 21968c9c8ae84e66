//! Page objects for the task manager UI
//!
//! Thin wrappers that name the application's elements. Every interaction
//! waits through [`WaitEngine`](crate::wait::WaitEngine) first.

mod login;
mod task_search;

pub use login::LoginPage;
pub use task_search::{TaskRow, TaskSearchPage};

use crate::error::E2eResult;
use crate::session::{BrowserDriver, ElementRef, Locator};

/// Whether `locator` resolves inside `parent`
pub(crate) async fn has_child(
    driver: &dyn BrowserDriver,
    parent: &ElementRef,
    locator: &Locator,
) -> E2eResult<bool> {
    match driver.find_in(parent, locator).await {
        Ok(_) => Ok(true),
        Err(e) if e.is_transient() => Ok(false),
        Err(e) => Err(e),
    }
}
