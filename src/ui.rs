//! Server-side HTML for every page.

use std::fmt::Write as _;

use crate::models::{Classification, Sentiment, SentimentCounts, SentimentLabel, StoredMessage};

/// Values echoed back into the send-email form.
#[derive(Debug, Default, Clone)]
pub struct SendFormValues<'a> {
    pub recipient: &'a str,
    pub subject: &'a str,
    pub message: &'a str,
}

pub fn render_index(signed_in: bool) -> String {
    let body = if signed_in {
        r#"<p>Welcome back.</p>
<ul>
  <li><a href="/home">Analyze recent mail</a></li>
  <li><a href="/seen-emails">Read and sent mail</a></li>
  <li><a href="/chatbot">Assistant</a></li>
</ul>"#
            .to_string()
    } else {
        r#"<p>Sign in with your Google account to analyze the mood of your mailbox.</p>
<p><a href="/login">Sign in</a></p>"#
            .to_string()
    };
    layout("Mail Mood", &body)
}

pub fn render_login(login_url: &str) -> String {
    let body = format!(
        r#"<p>Your session is missing or has expired.</p>
<p><a class="button" href="{}">Sign in with Google</a></p>"#,
        escape_html(login_url)
    );
    layout("Sign in", &body)
}

pub fn render_home(messages: &[StoredMessage], counts: &SentimentCounts) -> String {
    let mut body = String::new();
    body.push_str(&render_counts(counts));
    body.push_str(&render_message_table(messages, true));
    body.push_str(
        r#"<h2>Analyze text</h2>
<form method="post" action="/analyze_sentiment">
  <textarea name="email_content" rows="4" cols="60"></textarea>
  <button type="submit">Analyze</button>
</form>
<p><a href="/download-report">Download report (PDF)</a></p>"#,
    );
    layout("Your Emails", &body)
}

pub fn render_read_lists(received: &[StoredMessage], sent: &[StoredMessage]) -> String {
    let mut body = String::new();
    let _ = write!(body, "<h2>Received ({})</h2>", received.len());
    body.push_str(&render_message_table(received, false));
    let _ = write!(body, "<h2>Sent ({})</h2>", sent.len());
    body.push_str(&render_message_table(sent, false));
    layout("Read and Sent Emails", &body)
}

pub fn render_sentiment_result(
    content: &str,
    sentiment: &Sentiment,
    appended: usize,
    history: &[Classification],
) -> String {
    let mut body = format!(
        r#"<blockquote>{}</blockquote>
<p>Sentiment: <strong class="{}">{}</strong></p>
<p>Score: {:.3}</p>
<p>Recorded against {} stored message(s).</p>"#,
        format_quote(content),
        label_class(sentiment.label),
        sentiment.label,
        sentiment.score,
        appended
    );

    if !history.is_empty() {
        body.push_str(
            "<h2>History</h2>\n<table class=\"history\">\n<tr><th>Analyzed</th><th>Sentiment</th><th>Score</th></tr>\n",
        );
        for c in history {
            let _ = write!(
                body,
                r#"<tr><td>{}</td><td class="{}">{}</td><td>{:.3}</td></tr>"#,
                c.analyzed_at.format("%Y-%m-%d %H:%M:%S"),
                label_class(c.label),
                c.label,
                c.score
            );
            body.push('\n');
        }
        body.push_str("</table>");
    }

    body.push_str(r#"<p><a href="/home">Back</a></p>"#);
    layout("Sentiment Result", &body)
}

pub fn render_send_form(values: &SendFormValues<'_>, error: Option<&str>) -> String {
    let mut body = String::new();
    if let Some(error) = error {
        let _ = write!(body, r#"<p class="error">{}</p>"#, escape_html(error));
    }
    let _ = write!(
        body,
        r#"<form method="post" action="/send-email">
  <label>Recipient Email <input type="email" name="recipient" value="{}"></label><br>
  <label>Subject <input type="text" name="subject" maxlength="100" value="{}"></label><br>
  <label>Message<br><textarea name="message" rows="8" cols="60">{}</textarea></label><br>
  <button type="submit">Send</button>
</form>"#,
        escape_html(values.recipient),
        escape_html(values.subject),
        escape_html(values.message)
    );
    layout("Send Email", &body)
}

pub fn render_chat() -> String {
    let body = r#"<div id="log"></div>
<form id="chat">
  <input type="text" name="message" autocomplete="off" size="60">
  <button type="submit">Send</button>
</form>
<script>
document.getElementById('chat').addEventListener('submit', async (event) => {
  event.preventDefault();
  const input = event.target.message;
  const log = document.getElementById('log');
  const append = (who, text) => {
    const p = document.createElement('p');
    p.textContent = who + ': ' + text;
    log.appendChild(p);
  };
  append('You', input.value);
  const response = await fetch('/chatbot', {
    method: 'POST',
    headers: { 'Content-Type': 'application/x-www-form-urlencoded' },
    body: new URLSearchParams({ message: input.value }),
  });
  const data = await response.json().catch(() => ({ reply: 'Request failed.' }));
  append('Bot', data.reply);
  input.value = '';
});
</script>"#;
    layout("Assistant", body)
}

fn render_counts(counts: &SentimentCounts) -> String {
    format!(
        r#"<table class="counts">
  <tr><th>Positive</th><th>Negative</th><th>Neutral</th></tr>
  <tr><td>{}</td><td>{}</td><td>{}</td></tr>
</table>"#,
        counts.positive, counts.negative, counts.neutral
    )
}

fn render_message_table(messages: &[StoredMessage], with_sentiment: bool) -> String {
    if messages.is_empty() {
        return "<p>No messages.</p>".to_string();
    }

    let mut html = String::from("<table class=\"messages\">\n<tr><th>Received</th><th>Snippet</th>");
    if with_sentiment {
        html.push_str("<th>Sentiment</th><th>Score</th>");
    }
    html.push_str("</tr>\n");

    for message in messages {
        let _ = write!(
            html,
            "<tr><td>{}</td><td>{}</td>",
            message.received_at.format("%Y-%m-%d %H:%M"),
            format_snippet(&message.content)
        );
        if with_sentiment {
            match &message.sentiment {
                Some(s) => {
                    let _ = write!(
                        html,
                        r#"<td class="{}">{}</td><td>{:.3}</td>"#,
                        label_class(s.label),
                        s.label,
                        s.score
                    );
                }
                None => html.push_str("<td>-</td><td>-</td>"),
            }
        }
        html.push_str("</tr>\n");
    }
    html.push_str("</table>");
    html
}

fn label_class(label: SentimentLabel) -> &'static str {
    match label {
        SentimentLabel::Positive => "positive",
        SentimentLabel::Negative => "negative",
        SentimentLabel::Neutral => "neutral",
    }
}

fn layout(title: &str, body: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<title>{title}</title>
<style>
body {{ font-family: sans-serif; margin: 2em; }}
table {{ border-collapse: collapse; margin-bottom: 1em; }}
td, th {{ border: 1px solid #ccc; padding: 4px 8px; text-align: left; }}
.positive {{ color: #4CAF50; }}
.negative {{ color: #F44336; }}
.neutral {{ color: #b38600; }}
.error {{ color: #F44336; }}
</style>
</head>
<body>
<nav><a href="/">Home</a> | <a href="/home">All emails</a> | <a href="/seen-emails">Read/Sent</a> | <a href="/send-email">Send</a> | <a href="/chatbot">Chat</a> | <a href="/logout">Logout</a></nav>
<h1>{title}</h1>
{body}
</body>
</html>"#,
        title = escape_html(title),
        body = body
    )
}

pub fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// Longest snippet shown in a message table cell.
const PREVIEW_CHARS: usize = 160;

/// Submitted text with its line breaks kept.
fn format_quote(text: &str) -> String {
    text.trim()
        .lines()
        .map(escape_html)
        .collect::<Vec<_>>()
        .join("<br>")
}

fn format_snippet(text: &str) -> String {
    escape_html(&preview(text, PREVIEW_CHARS))
}

/// Single-line preview: whitespace runs become one space and anything past
/// `max_chars` is cut at a word boundary where possible.
fn preview(text: &str, max_chars: usize) -> String {
    let compact = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if compact.chars().count() <= max_chars {
        return compact;
    }

    let cut: String = compact.chars().take(max_chars).collect();
    let cut = match cut.rfind(' ') {
        Some(pos) if pos > max_chars / 2 => &cut[..pos],
        _ => cut.as_str(),
    };
    format!("{}…", cut.trim_end())
}
