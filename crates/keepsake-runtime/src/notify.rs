//! Confirmation Email
//!
//! Renders the bilingual (Portuguese, then English) payment confirmation and
//! hands it to an [`EmailTransport`]. There is no dedup here; callers decide
//! when a confirmation is due.

use std::sync::Arc;

use keepsake_core::order::redact_email;
use keepsake_core::{NotificationError, Order};

use crate::email::{EmailTransport, OutgoingEmail};

pub const SUBJECT: &str = "Sua página está pronta! / Your page is ready!";

/// Escape text for interpolation into HTML
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Build the confirmation email for a paid order
pub fn render_confirmation(order: &Order) -> OutgoingEmail {
    let couple = escape_html(&order.couple_name);
    let url = escape_html(&order.unique_url);
    let since = order.start_date.format("%d/%m/%Y");

    let mut html = format!(
        r#"<!DOCTYPE html>
<html>
<body style="font-family: Arial, sans-serif; color: #333; max-width: 600px; margin: 0 auto;">
  <h1 style="color: #e11d48;">{couple}</h1>
  <p>Seu pagamento foi confirmado e a página de vocês já está no ar, contando o tempo juntos desde {since}.</p>
  <p><a href="{url}" style="color: #e11d48;">{url}</a></p>
  <hr style="border: none; border-top: 1px solid #eee;">
  <p>Your payment is confirmed and your page is live, counting your time together since {since}.</p>
  <p><a href="{url}" style="color: #e11d48;">{url}</a></p>
"#
    );

    if let Some(qr) = &order.qr_code_url {
        let qr = escape_html(qr);
        html.push_str(&format!(
            r#"  <p>Compartilhe com este QR code / Share it with this QR code:</p>
  <img src="{qr}" alt="QR code" width="256" height="256">
"#
        ));
    }

    html.push_str("</body>\n</html>\n");

    OutgoingEmail {
        to: order.email.clone(),
        subject: SUBJECT.into(),
        html,
    }
}

/// Sends payment confirmations
#[derive(Clone)]
pub struct NotificationDispatcher {
    transport: Arc<dyn EmailTransport>,
}

impl NotificationDispatcher {
    pub fn new(transport: Arc<dyn EmailTransport>) -> Self {
        Self { transport }
    }

    /// Render and send the confirmation; returns the transport message id
    pub async fn send_confirmation(&self, order: &Order) -> Result<String, NotificationError> {
        let email = render_confirmation(order);
        let message_id = self.transport.send(&email).await?;

        tracing::info!(
            order_id = %order.id,
            to = %redact_email(&order.email),
            message_id = %message_id,
            has_qr = order.qr_code_url.is_some(),
            "Confirmation email sent"
        );
        Ok(message_id)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use async_trait::async_trait;
    use keepsake_core::testing::sample_order;
    use std::sync::Mutex;

    use crate::error::{Result, RuntimeError};

    /// Transport that records what it was asked to send
    #[derive(Default)]
    pub(crate) struct RecordingTransport {
        pub sent: Mutex<Vec<OutgoingEmail>>,
        pub fail: bool,
    }

    #[async_trait]
    impl EmailTransport for RecordingTransport {
        async fn send(&self, email: &OutgoingEmail) -> Result<String> {
            if self.fail {
                return Err(RuntimeError::http("email", 503, "unavailable"));
            }
            let mut sent = self.sent.lock().map_err(|e| RuntimeError::Config(e.to_string()))?;
            sent.push(email.clone());
            Ok(format!("msg_{}", sent.len()))
        }
    }

    #[test]
    fn test_render_contains_url_and_qr() {
        let mut order = sample_order("ana-leo");
        order.qr_code_url = Some("https://keepsake.app/uploads/x/qr-code.png".into());

        let email = render_confirmation(&order);

        assert_eq!(email.to, "ana@example.com");
        assert!(email.html.contains("https://keepsake.app/ana-leo"));
        assert!(email.html.contains("https://keepsake.app/uploads/x/qr-code.png"));
        assert!(email.html.contains("Ana &amp; Leo"));
        assert!(email.html.contains("14/02/2020"));

        let img = email.html.find("<img").unwrap();
        let end = email.html.find("</body>").unwrap();
        assert!(email.html.starts_with("<!DOCTYPE html>"));
        assert!(img < end);
        assert!(email.html.ends_with("</html>\n"));
    }

    #[test]
    fn test_render_without_qr() {
        let email = render_confirmation(&sample_order("ana-leo"));
        assert!(!email.html.contains("<img"));
    }

    #[tokio::test]
    async fn test_send_confirmation() {
        let transport = Arc::new(RecordingTransport::default());
        let dispatcher = NotificationDispatcher::new(transport.clone());

        let id = dispatcher.send_confirmation(&sample_order("ana-leo")).await.unwrap();

        assert_eq!(id, "msg_1");
        assert_eq!(transport.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_transport_failure_maps_to_notification_error() {
        let transport = Arc::new(RecordingTransport {
            fail: true,
            ..Default::default()
        });
        let err = NotificationDispatcher::new(transport)
            .send_confirmation(&sample_order("ana-leo"))
            .await
            .unwrap_err();
        assert!(matches!(err, NotificationError::Transport(_)));
    }
}
