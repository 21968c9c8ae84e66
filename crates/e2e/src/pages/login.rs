use taskwright_common::config::AppSettings;
use tracing::info;

use crate::error::E2eResult;
use crate::session::{BrowserDriver, Locator};
use crate::wait::WaitEngine;

const USERNAME_INPUT: &str = "login_username";
const PASSWORD_INPUT: &str = "login_password";
const SUBMIT_BUTTON: &str = "login_submit";
const ERROR_TOAST: &str = "toast-container";
const FIELD_ERRORS: &str = "error-messages";

pub struct LoginPage<'a> {
    driver: &'a dyn BrowserDriver,
    wait: WaitEngine,
}

impl<'a> LoginPage<'a> {
    pub fn new(driver: &'a dyn BrowserDriver, wait: WaitEngine) -> Self {
        Self { driver, wait }
    }

    pub async fn enter_login(&self, login: &str) -> E2eResult<()> {
        self.wait
            .type_into(self.driver, &Locator::id(USERNAME_INPUT), login, true)
            .await
    }

    pub async fn enter_password(&self, password: &str) -> E2eResult<()> {
        self.wait
            .type_into(self.driver, &Locator::id(PASSWORD_INPUT), password, true)
            .await
    }

    pub async fn click_login(&self) -> E2eResult<()> {
        self.wait.click(self.driver, &Locator::id(SUBMIT_BUTTON)).await
    }

    pub async fn is_login_enabled(&self) -> E2eResult<bool> {
        let button = self
            .wait
            .for_visible(self.driver, &Locator::id(SUBMIT_BUTTON))
            .await?;
        self.driver.is_enabled(&button).await
    }

    /// Text of the toast shown after a rejected login
    pub async fn error_message(&self) -> E2eResult<String> {
        let toast = self.wait.for_visible(self.driver, &Locator::id(ERROR_TOAST)).await?;
        self.driver.text(&toast).await
    }

    /// Text of the inline field validation messages
    pub async fn field_errors(&self) -> E2eResult<String> {
        let errors = self.wait.for_visible(self.driver, &Locator::id(FIELD_ERRORS)).await?;
        self.driver.text(&errors).await
    }

    /// Open the public home page, sign in, and wait for the application URL
    pub async fn login(&self, app: &AppSettings, username: &str, password: &str) -> E2eResult<()> {
        self.driver.goto(&app.public_home_url).await?;
        self.enter_login(username).await?;
        self.enter_password(password).await?;
        self.click_login().await?;
        self.wait.for_url(self.driver, &app.application_url).await?;
        info!("Logged in as {}", username);
        Ok(())
    }
}
