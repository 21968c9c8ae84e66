use tracing::debug;

use crate::error::E2eResult;
use crate::pages::has_child;
use crate::session::{BrowserDriver, ElementRef, Locator};
use crate::wait::WaitEngine;

const TITLE_INPUT: &str = "task-search-title";
const DESCRIPTION_INPUT: &str = "task-search-description";
const DUE_DATE_INPUT: &str = "input[formControlName='dueDate']";
const COMPLETED_CHECKBOX: &str = "task-search-completed";
const NOT_COMPLETED_CHECKBOX: &str = "task-search-not-completed";
const SEARCH_BUTTON: &str = "task-search-btn-consult-records";
const CREATE_BUTTON: &str = "task-search-btn-create-record";
const NO_CONTENT_MESSAGE: &str = "task-search-no-content-message";

/// Result rows, excluding the "no content" placeholder row
pub const RESULT_ROWS: &str = "tbody tr:not(#task-search-no-content)";

pub const COLUMN_TITLE: &str = "task-search-column-task-title";
pub const COLUMN_DESCRIPTION: &str = "task-search-column-task-description";
pub const COLUMN_DUE_DATE: &str = "task-search-column-task-duedate";
pub const COLUMN_COMPLETED: &str = "task-search-column-task-completed";
pub const ACTION_EDIT: &str = "task-search-action-update-task";
pub const ACTION_DELETE: &str = "task-search-action-remove-task";

pub struct TaskSearchPage<'a> {
    driver: &'a dyn BrowserDriver,
    wait: WaitEngine,
}

impl<'a> TaskSearchPage<'a> {
    pub fn new(driver: &'a dyn BrowserDriver, wait: WaitEngine) -> Self {
        Self { driver, wait }
    }

    pub async fn enter_title(&self, title: &str) -> E2eResult<()> {
        self.wait
            .type_into(self.driver, &Locator::id(TITLE_INPUT), title, true)
            .await
    }

    pub async fn enter_description(&self, description: &str) -> E2eResult<()> {
        self.wait
            .type_into(self.driver, &Locator::id(DESCRIPTION_INPUT), description, true)
            .await
    }

    pub async fn enter_due_date(&self, due_date: &str) -> E2eResult<()> {
        self.wait
            .type_into(self.driver, &Locator::css(DUE_DATE_INPUT), due_date, true)
            .await
    }

    pub async fn select_completed(&self) -> E2eResult<()> {
        self.ensure_checked(COMPLETED_CHECKBOX).await
    }

    pub async fn select_not_completed(&self) -> E2eResult<()> {
        self.ensure_checked(NOT_COMPLETED_CHECKBOX).await
    }

    async fn ensure_checked(&self, id: &str) -> E2eResult<()> {
        let locator = Locator::id(id);
        let checkbox = self.wait.for_enabled(self.driver, &locator).await?;
        if !self.driver.is_selected(&checkbox).await? {
            self.wait.click(self.driver, &locator).await?;
        }
        Ok(())
    }

    pub async fn click_search(&self) -> E2eResult<()> {
        self.wait.click(self.driver, &Locator::id(SEARCH_BUTTON)).await
    }

    pub async fn click_create_task(&self) -> E2eResult<()> {
        self.wait.click(self.driver, &Locator::id(CREATE_BUTTON)).await
    }

    /// Rows currently rendered in the result table
    pub async fn task_rows(&self) -> E2eResult<Vec<TaskRow<'a>>> {
        let elements = self.driver.find_all(&Locator::css(RESULT_ROWS)).await?;
        Ok(elements
            .into_iter()
            .map(|element| TaskRow {
                driver: self.driver,
                wait: self.wait,
                element,
            })
            .collect())
    }

    /// The rendered row whose title cell reads exactly `title`
    pub async fn find_task_row(&self, title: &str) -> E2eResult<Option<TaskRow<'a>>> {
        for row in self.task_rows().await? {
            if row.title().await? == title {
                return Ok(Some(row));
            }
        }
        Ok(None)
    }

    /// Wait until a row titled `title` is rendered
    pub async fn wait_for_task_row(&self, title: &str) -> E2eResult<TaskRow<'a>> {
        let spec = self.wait.spec(format!("task row '{}'", title));
        let row = self.wait.until(spec, || self.find_task_row(title)).await?;
        debug!("Found task row '{}'", title);
        Ok(row)
    }

    /// Rows whose completed column reads "Yes"
    pub async fn completed_rows(&self) -> E2eResult<Vec<TaskRow<'a>>> {
        let mut completed = Vec::new();
        for row in self.task_rows().await? {
            if row.is_completed().await? {
                completed.push(row);
            }
        }
        Ok(completed)
    }

    /// Wait for the empty-result message and return its text
    pub async fn no_records_message(&self) -> E2eResult<String> {
        let message = self
            .wait
            .for_visible(self.driver, &Locator::id(NO_CONTENT_MESSAGE))
            .await?;
        self.driver.text(&message).await
    }
}

/// One rendered task row
pub struct TaskRow<'a> {
    driver: &'a dyn BrowserDriver,
    wait: WaitEngine,
    element: ElementRef,
}

impl<'a> TaskRow<'a> {
    pub fn element(&self) -> &ElementRef {
        &self.element
    }

    async fn cell(&self, id: &str) -> E2eResult<String> {
        let cell = self.driver.find_in(&self.element, &Locator::id(id)).await?;
        self.driver.text(&cell).await
    }

    pub async fn title(&self) -> E2eResult<String> {
        self.cell(COLUMN_TITLE).await
    }

    pub async fn description(&self) -> E2eResult<String> {
        self.cell(COLUMN_DESCRIPTION).await
    }

    pub async fn due_date(&self) -> E2eResult<String> {
        self.cell(COLUMN_DUE_DATE).await
    }

    /// "Yes" or "No" as rendered
    pub async fn completed(&self) -> E2eResult<String> {
        self.cell(COLUMN_COMPLETED).await
    }

    pub async fn is_completed(&self) -> E2eResult<bool> {
        Ok(self.completed().await?.trim() == "Yes")
    }

    pub async fn has_edit_button(&self) -> E2eResult<bool> {
        has_child(self.driver, &self.element, &Locator::id(ACTION_EDIT)).await
    }

    pub async fn has_delete_button(&self) -> E2eResult<bool> {
        has_child(self.driver, &self.element, &Locator::id(ACTION_DELETE)).await
    }

    pub async fn click_edit(&self) -> E2eResult<()> {
        self.wait
            .click_in(self.driver, &self.element, &Locator::id(ACTION_EDIT))
            .await
    }

    pub async fn click_delete(&self) -> E2eResult<()> {
        self.wait
            .click_in(self.driver, &self.element, &Locator::id(ACTION_DELETE))
            .await
    }
}
