use std::fmt::{self, Display, Formatter};
use std::time::Duration;

use inventory_client_instrumented::prelude::{
    CallError, Credentials, InventoryClient, OrderItem, OrderRequest,
};
use race_tunnel_runner::prelude::deserialize_duration;
use serde::Deserialize;

const ID_ALPHABET: [char; 36] = [
    'a', 'b', 'c', 'd', 'e', 'f', 'g', 'h', 'i', 'j', 'k', 'l', 'm', 'n', 'o', 'p', 'q', 'r', 's',
    't', 'u', 'v', 'w', 'x', 'y', 'z', '0', '1', '2', '3', '4', '5', '6', '7', '8', '9',
];

/// Settings for the shopper journey, read from the `[journey]` configuration section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct JourneyConfig {
    pub password: String,
    pub email_domain: String,
    pub user_id: i64,
    pub amount: f64,
    pub order_quantity: u32,
    /// A created order must carry a payment URL containing this.
    pub payment_url_contains: String,
    /// Status a freshly created order must report.
    pub expected_order_status: String,
    /// Pause after register, login and ordering.
    #[serde(deserialize_with = "deserialize_duration")]
    pub think_time: Duration,
    /// Pause after browsing products.
    #[serde(deserialize_with = "deserialize_duration")]
    pub browse_think_time: Duration,
}

impl Default for JourneyConfig {
    fn default() -> Self {
        Self {
            password: "SecurePass123!".to_string(),
            email_domain: "test.com".to_string(),
            user_id: 1,
            amount: 149.99,
            order_quantity: 1,
            payment_url_contains: "stripe.com".to_string(),
            expected_order_status: "PENDING".to_string(),
            think_time: Duration::from_millis(500),
            browse_think_time: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JourneyStep {
    Register,
    Login,
    BrowseProducts,
    CreateOrder,
    VerifyOrder,
}

impl JourneyStep {
    pub fn label(self) -> &'static str {
        match self {
            JourneyStep::Register => "register",
            JourneyStep::Login => "login",
            JourneyStep::BrowseProducts => "browse_products",
            JourneyStep::CreateOrder => "create_order",
            JourneyStep::VerifyOrder => "verify_order",
        }
    }
}

impl Display for JourneyStep {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// The step a journey stopped at and why. Later steps are not attempted.
#[derive(Debug, thiserror::Error)]
#[error("journey aborted at {step}: {reason}")]
pub struct JourneyAbort {
    pub step: JourneyStep,
    pub reason: String,
}

impl JourneyAbort {
    fn new(step: JourneyStep, reason: impl Into<String>) -> Self {
        Self {
            step,
            reason: reason.into(),
        }
    }

    fn call_failed(step: JourneyStep) -> impl FnOnce(CallError) -> Self {
        move |e| Self::new(step, e.to_string())
    }
}

/// One shopper going from sign up to a placed order, as a fresh user each time.
pub struct Journey<'a> {
    client: &'a InventoryClient,
    sku: &'a str,
    config: &'a JourneyConfig,
}

impl<'a> Journey<'a> {
    pub fn new(client: &'a InventoryClient, sku: &'a str, config: &'a JourneyConfig) -> Self {
        Self {
            client,
            sku,
            config,
        }
    }

    /// Run every step in order, stopping at the first one that fails its check.
    pub async fn run(&self) -> Result<(), JourneyAbort> {
        let unique_id = nanoid::nanoid!(12, &ID_ALPHABET);
        let email = format!("user-{unique_id}@{}", self.config.email_domain);
        let credentials = Credentials {
            username: format!("user_{unique_id}"),
            password: self.config.password.clone(),
        };

        self.client
            .register(&credentials)
            .await
            .map_err(JourneyAbort::call_failed(JourneyStep::Register))?;
        think(self.config.think_time).await;

        let login = self
            .client
            .login(&credentials)
            .await
            .map_err(JourneyAbort::call_failed(JourneyStep::Login))?;
        let shopper = self.client.with_token(login.token);
        think(self.config.think_time).await;

        shopper
            .list_products()
            .await
            .map_err(JourneyAbort::call_failed(JourneyStep::BrowseProducts))?;
        think(self.config.browse_think_time).await;

        let order = shopper
            .create_order(&OrderRequest {
                user_id: self.config.user_id,
                customer_email: email,
                amount: self.config.amount,
                items: vec![OrderItem {
                    sku: self.sku.to_string(),
                    quantity: self.config.order_quantity,
                }],
            })
            .await
            .map_err(JourneyAbort::call_failed(JourneyStep::CreateOrder))?;
        match &order.payment_url {
            Some(url) if url.contains(&self.config.payment_url_contains) => {}
            Some(url) => {
                return Err(JourneyAbort::new(
                    JourneyStep::CreateOrder,
                    format!(
                        "payment URL `{url}` does not contain `{}`",
                        self.config.payment_url_contains
                    ),
                ))
            }
            None => {
                return Err(JourneyAbort::new(
                    JourneyStep::CreateOrder,
                    format!("order {} has no payment URL", order.id),
                ))
            }
        }
        think(self.config.think_time).await;

        let status = shopper
            .get_order(&order.id)
            .await
            .map_err(JourneyAbort::call_failed(JourneyStep::VerifyOrder))?;
        match status.status.as_deref() {
            Some(status) if status == self.config.expected_order_status => Ok(()),
            other => Err(JourneyAbort::new(
                JourneyStep::VerifyOrder,
                format!(
                    "order {} has status {:?}, expected {}",
                    order.id, other, self.config.expected_order_status
                ),
            )),
        }
    }
}

async fn think(pause: Duration) {
    if !pause.is_zero() {
        tokio::time::sleep(pause).await;
    }
}
