pub mod schema;

pub use schema::{
    AiConfig, BusinessHoursConfig, Config, Environment, FacebookConfig, GatewayConfig,
    LinkMobilityConfig, NotificationsConfig, ProvidersConfig, SendGridConfig, SkebbyConfig,
    TwilioConfig,
};
