use tera::{Context, Tera};

use super::models::ChangeNotice;

const CHANGE_SUBJECT: &str = "{{ title }} - content update";

const CHANGE_BODY: &str = "\
The watched content has changed.

Task: {{ task_name }}
Page title: {{ title }}
URL: {{ url }}
Checked at: {{ check_time }}

---
Previous content:
{{ old_content }}

---
New content:
{{ new_content }}

---
Sent automatically by webmonitor.
";

const TEST_BODY: &str = "\
This is a test message from webmonitor.

Channel: {{ channel_name }}
Sent at: {{ sent_at }}

If you received this, the channel works.
";

/// Renders subject and body of a change notification.
pub fn render_change_notice(notice: &ChangeNotice) -> Result<(String, String), tera::Error> {
    let context = Context::from_serialize(notice)?;
    let subject = Tera::one_off(CHANGE_SUBJECT, &context, false)?;
    let body = Tera::one_off(CHANGE_BODY, &context, false)?;
    Ok((subject, body))
}

pub fn render_test_message(channel_name: &str, sent_at: &str) -> Result<String, tera::Error> {
    let mut context = Context::new();
    context.insert("channel_name", channel_name);
    context.insert("sent_at", sent_at);
    Tera::one_off(TEST_BODY, &context, false)
}
