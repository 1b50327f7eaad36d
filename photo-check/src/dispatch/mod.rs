// Push dispatch: gateway contract and the worker that drains due tasks.

pub mod gateway;
pub mod worker;

pub use gateway::{
    gateway_from_settings, DryRunGateway, GatewayError, MessagingGateway, PushMessage, WebhookGateway,
};
pub use worker::{DispatchReport, DispatchWorker};
