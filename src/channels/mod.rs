//! Provider integrations: inbound payload normalizers and outbound senders.
//!
//! Each provider module owns its wire format end to end. The rest of the
//! crate sees [`crate::message::WebhookEvent`] on the way in and the
//! [`OutboundSender`] trait on the way out.

pub mod linkmobility;
pub mod messenger;
pub mod sendgrid;
pub mod skebby;
pub mod traits;
pub mod twilio;

pub use traits::OutboundSender;

/// Credentials ride on every outbound request; plain HTTP is allowed only
/// toward loopback (local emulators and test doubles).
pub(crate) fn ensure_https(url: &str) -> anyhow::Result<()> {
    if url.starts_with("https://") {
        return Ok(());
    }
    if url.starts_with("http://127.0.0.1") || url.starts_with("http://localhost") {
        return Ok(());
    }
    anyhow::bail!("Refusing to transmit credentials over non-HTTPS URL: URL scheme must be https")
}
