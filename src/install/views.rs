//! HTML fragments for the viewing steps and the page around them

use step_flow::FlowState;

const EMIT_PATH: &str = "/install/emit";

/// Escape HTML special characters.
pub fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

fn field(state: &FlowState, path: &str) -> String {
    escape_html(state.lookup_str(path).unwrap_or_default())
}

fn flag(state: &FlowState, path: &str) -> Option<bool> {
    state.lookup(path).and_then(|value| value.as_bool())
}

fn error_status(state: &FlowState) -> String {
    match state.error_message() {
        Some(message) if state.has_error() => format!(
            r#"<div class="status text-danger">{}</div>"#,
            escape_html(message)
        ),
        _ => r#"<div class="status hidden"></div>"#.to_string(),
    }
}

pub fn input_email(state: &FlowState) -> String {
    format!(
        r#"
  <p>Great! Create an account with your email address.</p>

  <form novalidate action="{action}" method="POST"
        onsubmit="return request(this.method, this.action, new FormData(this))">
    <input type="hidden" name="event" value="did-submit-email">
    <input class="input-text" name="email" type="email" value="{email}">
    <button class="btn btn-primary btn-block">Continue</button>
    {status}
  </form>"#,
        action = EMIT_PATH,
        email = field(state, "account.email"),
        status = error_status(state),
    )
}

pub fn login(state: &FlowState) -> String {
    let reset = if flag(state, "account.reset_sent").unwrap_or(false) {
        r#"<p class="notice">We've sent you a link to reset your password.</p>"#
    } else {
        ""
    };
    format!(
        r##"
  <p>It seems like you already have an account. Sign in with your login info.</p>
  {reset}
  <form novalidate action="{action}" method="POST"
        onsubmit="return request(this.method, this.action, new FormData(this))">
    <input type="hidden" name="event" value="did-submit-credentials">
    <input class="input-text" name="email" type="email" value="{email}">
    <input class="input-text" name="password" type="password" value="">
    <button class="btn btn-primary btn-block" type="submit">Sign in</button>
    <div class="secondary-actions">
      <a class="back" href="#" onclick="return submitEvent('did-click-back')">Back</a>
      <a class="reset-password secondary-cta" href="#"
         onclick="return submitEvent('did-forgot-password')">Forgot password</a>
    </div>
    {status}
  </form>"##,
        reset = reset,
        action = EMIT_PATH,
        email = field(state, "account.email"),
        status = error_status(state),
    )
}

pub fn whitelist(state: &FlowState) -> String {
    let greeting = if flag(state, "account.created").unwrap_or(false) {
        format!(
            r#"<p class="email">Great, we've sent you an email to {}. Remember to set your password later!</p>"#,
            field(state, "account.email")
        )
    } else {
        format!(
            r#"<p class="email">Signed in as {}.</p>"#,
            field(state, "account.email")
        )
    };
    format!(
        r##"
  {greeting}
  <p class="text-highlight">
    Where enabled, your code is sent to the service, where it is kept private and secure.
  </p>
  <p>
    You can restrict access to individual files or entire directories at any time.
  </p>

  <form novalidate action="{action}" method="POST"
        onsubmit="return request(this.method, this.action, new FormData(this))">
    <input type="hidden" name="event" value="did-whitelist">
    <div class="actions">
      <button class="btn btn-primary">Enable access for {path}</button>
      <a class="skip secondary-cta" href="#" onclick="return submitEvent('did-skip-whitelist')">Add Later</a>
    </div>
  </form>"##,
        greeting = greeting,
        action = EMIT_PATH,
        path = field(state, "path"),
    )
}

pub fn end(state: &FlowState) -> String {
    let access = if flag(state, "whitelist.done").unwrap_or(false) {
        format!(
            "<p>Access is enabled for {}.</p>",
            field(state, "path")
        )
    } else {
        "<p>You can enable access for your projects later from the settings.</p>".to_string()
    };
    format!(
        r#"
  <div class="welcome">
    <h3>Welcome!</h3>
    <p>Everything is installed and running.</p>
    {access}
  </div>"#,
        access = access,
    )
}

pub fn error(state: &FlowState) -> String {
    format!(
        r#"<div class="status"><h4>{}</h4></div>"#,
        escape_html(state.error_message().unwrap_or("Something went wrong"))
    )
}

fn hidden_unless(active: bool) -> &'static str {
    if active {
        ""
    } else {
        " hidden"
    }
}

/// Wraps the current view with the progress indicators.
///
/// A phase indicator is visible while its key exists and `done` is not yet set.
pub fn render_page(view: Option<String>, state: &FlowState, progress: f64) -> String {
    let downloading = flag(state, "download.done") == Some(false);
    let installing = flag(state, "install.done") == Some(false);
    let starting = flag(state, "running.done") == Some(false);
    let percent = if progress < 0.0 {
        0
    } else {
        (progress * 100.0).round() as u32
    };
    let content = view.unwrap_or_else(|| "install".to_string());

    format!(
        r#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<title>Install</title>
<script>
function request(method, url, data) {{
  fetch(url, {{ method: method, body: new URLSearchParams(data) }}).then(function () {{ setTimeout(function () {{ location.reload(); }}, 200); }});
  return false;
}}
function submitEvent(name) {{
  var data = new FormData();
  data.append('event', name);
  return request('POST', '{action}', data);
}}
function initDownloadProgress() {{
  setInterval(function () {{
    fetch('/install/progress').then(function (res) {{ return res.text(); }}).then(function (text) {{
      var ratio = parseFloat(text);
      var bar = document.querySelector('.download progress');
      if (bar && ratio >= 0) {{ bar.value = Math.round(ratio * 100); }}
    }});
  }}, 500);
}}
</script>
</head>
<body onload="initDownloadProgress()">
<div class="install">
  <div class="progress-indicators">
    <div class="download{download_hidden}">
      <progress max="100" value="{percent}" class="inline-block"></progress>
      <span class="inline-block">Downloading</span>
    </div>
    <div class="install-step{install_hidden}">
      <span class="inline-block">Installing</span>
    </div>
    <div class="run{run_hidden}">
      <span class="inline-block">Starting</span>
    </div>
  </div>
  <div class="content">{content}</div>
</div>
</body>
</html>"#,
        action = EMIT_PATH,
        download_hidden = hidden_unless(downloading),
        percent = percent,
        install_hidden = hidden_unless(installing),
        run_hidden = hidden_unless(starting),
        content = content,
    )
}
