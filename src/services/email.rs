use anyhow::Context;
use lettre::{
    message::{header::ContentType, Mailbox, MultiPart, SinglePart},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use uuid::Uuid;

use crate::config::Config;

pub struct EmailService {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

/// Details for a fee-overdue reminder.
pub struct FeeReminder<'a> {
    pub guardian_email: &'a str,
    pub guardian_name: &'a str,
    pub student_name: &'a str,
    pub center_name: &'a str,
    pub logo_url: &'a str,
    pub month_label: &'a str,
    pub outstanding: &'a str,
    pub due_date: &'a str,
}

impl EmailService {
    /// Returns None if SMTP is not fully configured.
    pub fn new(config: &Config) -> Option<Self> {
        let host = config.smtp_host.as_deref()?;
        let username = config.smtp_username.clone()?;
        let password = config.smtp_password.clone()?;
        let from_addr = config.smtp_from.as_deref()?;

        let port = config.smtp_port.unwrap_or(587);
        let creds = Credentials::new(username, password);

        let transport = if port == 465 {
            AsyncSmtpTransport::<Tokio1Executor>::relay(host)
                .ok()?
                .credentials(creds)
                .build()
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)
                .ok()?
                .credentials(creds)
                .build()
        };

        let from: Mailbox = from_addr.parse().ok()?;

        Some(Self { transport, from })
    }

    // ─── Private helpers ─────────────────────────────────────────────────────

    fn new_message_id(&self) -> String {
        format!("<{}@{}>", Uuid::new_v4(), self.from.email.domain())
    }

    fn recipient(email: &str, name: &str) -> anyhow::Result<Mailbox> {
        format!("{name} <{email}>")
            .parse::<Mailbox>()
            .or_else(|_| email.parse::<Mailbox>())
            .with_context(|| format!("Invalid recipient address: {email}"))
    }

    /// Wraps inner HTML content in the center-branded layout.
    /// Shows the center logo if logo_url is non-empty, otherwise its name as text.
    fn wrap_html(logo_url: &str, center_name: &str, content: &str) -> String {
        let header = if !logo_url.is_empty() {
            format!(
                r#"<img src="{logo_url}" alt="{center_name}" style="max-height:64px;max-width:200px;display:block;margin:0 auto">"#
            )
        } else {
            format!(
                r#"<p style="margin:0;font-size:20px;font-weight:700;color:#0f172a;text-align:center">{center_name}</p>"#
            )
        };

        format!(
            r#"<!DOCTYPE html>
<html lang="en">
<head>
  <meta charset="utf-8">
  <meta name="viewport" content="width=device-width,initial-scale=1">
  <title>{center_name}</title>
</head>
<body style="margin:0;padding:0;background-color:#f1f5f9;font-family:-apple-system,BlinkMacSystemFont,'Segoe UI',Roboto,Helvetica,Arial,sans-serif">
  <table role="presentation" width="100%" cellpadding="0" cellspacing="0" style="background-color:#f1f5f9;padding:40px 16px">
    <tr>
      <td align="center">
        <table role="presentation" width="100%" cellpadding="0" cellspacing="0" style="max-width:520px">
          <tr><td align="center" style="padding-bottom:28px">{header}</td></tr>
          <tr>
            <td style="background:#ffffff;border-radius:12px;padding:40px;box-shadow:0 1px 3px rgba(0,0,0,0.08)">
              {content}
            </td>
          </tr>
          <tr>
            <td align="center" style="padding-top:20px">
              <p style="margin:0;font-size:12px;color:#94a3b8">{center_name}</p>
            </td>
          </tr>
        </table>
      </td>
    </tr>
  </table>
</body>
</html>"#
        )
    }

    async fn send_email(
        &self,
        from: Mailbox,
        to: Mailbox,
        subject: &str,
        text: &str,
        html: &str,
    ) -> anyhow::Result<()> {
        let email = Message::builder()
            .message_id(Some(self.new_message_id()))
            .from(from)
            .to(to)
            .subject(subject)
            .multipart(
                MultiPart::alternative()
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_PLAIN)
                            .body(text.to_string()),
                    )
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_HTML)
                            .body(html.to_string()),
                    ),
            )
            .context("Failed to build email message")?;

        self.transport
            .send(email)
            .await
            .context("Failed to send email")?;

        Ok(())
    }

    // ─── Public methods ───────────────────────────────────────────────────────

    pub async fn send_fee_reminder(&self, r: &FeeReminder<'_>) -> anyhow::Result<()> {
        let from = Mailbox::new(Some(r.center_name.to_string()), self.from.email.clone());
        let to = Self::recipient(r.guardian_email, r.guardian_name)?;

        let subject = format!("Fee reminder for {} ({})", r.student_name, r.month_label);

        let text = format!(
            "Dear {guardian},\n\n\
            This is a reminder that the {month} fee for {student} is overdue.\n\
            Outstanding amount: {amount} (due {due}).\n\n\
            Please contact {center} if you have already paid.\n",
            guardian = r.guardian_name,
            month = r.month_label,
            student = r.student_name,
            amount = r.outstanding,
            due = r.due_date,
            center = r.center_name,
        );

        let content = format!(
            r#"<h1 style="margin:0 0 16px 0;font-size:20px;font-weight:700;color:#0f172a">Fee reminder</h1>
<p style="margin:0 0 16px 0;font-size:15px;color:#374151">Dear <strong>{guardian}</strong>,</p>
<p style="margin:0 0 20px 0;font-size:15px;color:#374151">The <strong>{month}</strong> fee for <strong>{student}</strong> is overdue.</p>
<table role="presentation" width="100%" cellpadding="0" cellspacing="0" style="margin-bottom:20px">
  <tr><td style="padding:8px 12px;border-bottom:1px solid #f1f5f9;font-size:14px;color:#64748b">Outstanding</td><td style="padding:8px 12px;border-bottom:1px solid #f1f5f9;font-size:14px;font-weight:700;color:#dc2626">{amount}</td></tr>
  <tr><td style="padding:8px 12px;font-size:14px;color:#64748b">Due date</td><td style="padding:8px 12px;font-size:14px;color:#0f172a">{due}</td></tr>
</table>
<p style="margin:0;font-size:13px;color:#94a3b8">If you have already paid, please contact {center}.</p>"#,
            guardian = r.guardian_name,
            month = r.month_label,
            student = r.student_name,
            amount = r.outstanding,
            due = r.due_date,
            center = r.center_name,
        );

        let html = Self::wrap_html(r.logo_url, r.center_name, &content);
        self.send_email(from, to, &subject, &text, &html).await
    }

    pub async fn send_report_card_notice(
        &self,
        guardian_email: &str,
        guardian_name: &str,
        student_name: &str,
        period_name: &str,
        center_name: &str,
        logo_url: &str,
    ) -> anyhow::Result<()> {
        let from = Mailbox::new(Some(center_name.to_string()), self.from.email.clone());
        let to = Self::recipient(guardian_email, guardian_name)?;

        let subject = format!("{period_name} report card for {student_name}");
        let text = format!(
            "Dear {guardian_name},\n\n\
            The {period_name} report card for {student_name} is now available from {center_name}.\n"
        );
        let content = format!(
            r#"<h1 style="margin:0 0 16px 0;font-size:20px;font-weight:700;color:#0f172a">Report card available</h1>
<p style="margin:0 0 16px 0;font-size:15px;color:#374151">Dear <strong>{guardian_name}</strong>,</p>
<p style="margin:0;font-size:15px;color:#374151">The <strong>{period_name}</strong> report card for <strong>{student_name}</strong> has been published.</p>"#
        );

        let html = Self::wrap_html(logo_url, center_name, &content);
        self.send_email(from, to, &subject, &text, &html).await
    }
}
