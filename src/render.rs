//! HTML rendering of the chat page.
//!
//! Rendering is a pure function of a [`PageView`]: handlers mutate session
//! state, then the page is rebuilt from scratch. Templates are registered
//! under `.html` names so minijinja auto-escapes every interpolated value.

use anyhow::Result;
use minijinja::{context, Environment};
use serde::Serialize;

use crate::models::ChatMessage;
use crate::session::Notice;

const PAGE_TEMPLATE: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<title>GitHub Repo Chat</title>
<style>
  body { font-family: system-ui, sans-serif; margin: 0 2rem 2rem; color: #1f2328; }
  .columns { display: flex; gap: 2rem; }
  .chat { flex: 2; }
  .repos { flex: 1; }
  .notice { padding: .6rem 1rem; border-radius: 6px; margin: .5rem 0; }
  .notice.info { background: #ddf4ff; }
  .notice.success { background: #dafbe1; }
  .notice.error { background: #ffebe9; }
  .message { white-space: pre-wrap; padding: .5rem 0; border-bottom: 1px solid #eee; }
  .role { font-weight: 600; margin-right: .5rem; }
  .caption { color: #59636e; }
  input[type=text] { width: 100%; box-sizing: border-box; padding: .4rem; }
</style>
</head>
<body>
<h1>Chat with GitHub Repository &#x1F4AC;</h1>
<p class="caption">Chat with a GitHub repository using {{ view.llm_model }} running on Ollama.</p>
{% for notice in view.notices %}
<div class="notice {{ notice.level }}">{{ notice.message }}</div>
{% endfor %}
<div class="columns">
  <section class="chat">
    <h2>Chat</h2>
    <div id="transcript">
    {% for message in view.chat_history %}
      <div class="message {{ message.role }}"><span class="role">{{ message.role }}</span>{{ message.content }}</div>
    {% endfor %}
    </div>
    <form method="post" action="/chat">
      <label for="prompt">Ask any question about the GitHub Repo</label>
      <input type="text" id="prompt" name="prompt" autofocus>
    </form>
    <form method="post" action="/chat/clear">
      <button type="submit">Clear Chat History</button>
    </form>
  </section>
  <section class="repos">
    <h2>Repository Management</h2>
    <form method="post" action="/repos">
      <label for="repo">Enter the GitHub Repo (format: username/repo)</label>
      <input type="text" id="repo" name="repo">
    </form>
    <h2>Loaded Repositories</h2>
    <ul id="loaded-repos">
    {% for repo in view.loaded_repos %}
      <li>{{ repo }}</li>
    {% endfor %}
    </ul>
    <p class="caption">Vector store: {{ view.store_dir }}</p>
    <form method="post" action="/session/end">
      <button type="submit">End Session</button>
    </form>
  </section>
</div>
</body>
</html>
"#;

/// Everything the page shows.
#[derive(Debug, Serialize)]
pub struct PageView<'a> {
    pub llm_model: &'a str,
    pub store_dir: String,
    pub notices: Vec<Notice>,
    pub chat_history: &'a [ChatMessage],
    /// Shown in the given order.
    pub loaded_repos: Vec<String>,
}

pub struct Renderer {
    env: Environment<'static>,
}

impl Renderer {
    pub fn new() -> Result<Self> {
        let mut env = Environment::new();
        env.add_template("page.html", PAGE_TEMPLATE)?;
        Ok(Self { env })
    }

    pub fn render_page(&self, view: &PageView<'_>) -> Result<String> {
        let template = self.env.get_template("page.html")?;
        Ok(template.render(context! { view => view })?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn view<'a>(history: &'a [ChatMessage], notices: Vec<Notice>) -> PageView<'a> {
        PageView {
            llm_model: "llama3:instruct",
            store_dir: "/tmp/repo-chat-x-vectordb".to_string(),
            notices,
            chat_history: history,
            loaded_repos: vec!["octocat/Hello-World".to_string()],
        }
    }

    fn render(view: &PageView<'_>) -> String {
        let html = Renderer::new().unwrap().render_page(view).unwrap();
        html.replace("&#x2f;", "/")
    }

    #[test]
    fn renders_transcript_in_order() {
        let history = vec![
            ChatMessage::user("What does this repo do?"),
            ChatMessage::assistant("It prints hello."),
        ];
        let html = render(&view(&history, vec![]));
        let q = html.find("What does this repo do?").unwrap();
        let a = html.find("It prints hello.").unwrap();
        assert!(q < a);
        assert!(html.contains("<li>octocat/Hello-World</li>"));
        assert!(html.contains("llama3:instruct"));
    }

    #[test]
    fn escapes_user_content() {
        let history = vec![ChatMessage::user("<script>alert(1)</script>")];
        let html = render(&view(&history, vec![]));
        assert!(!html.contains("<script>"));
        assert!(html.contains("&lt;script&gt;"));
    }

    #[test]
    fn renders_notices_with_level_class() {
        let notices = vec![Notice::error("Error loading repository: boom")];
        let html = render(&view(&[], notices));
        assert!(html.contains(r#"<div class="notice error">Error loading repository: boom</div>"#));
    }

    #[test]
    fn offers_end_session_control() {
        let html = render(&view(&[], vec![]));
        assert!(html.contains(r#"<form method="post" action="/session/end">"#));
    }
}
