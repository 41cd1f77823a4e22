//! Rendering of the notification text sent to Telegram.
//!
//! Messages use Telegram's HTML parse mode, so user-controlled fields are
//! escaped before interpolation.

use taskrelay_event::TaskEvent;

pub fn priority_label(priority: i64) -> String {
    match priority {
        1 => "Низкий".to_string(),
        2 => "Высокий".to_string(),
        3 => "Критический".to_string(),
        other => format!("Приоритет {other}"),
    }
}

/// Builds the notification body: urgent header, creator, title, priority,
/// deadline (if any), and a deep link to the task card.
pub fn render_task_notification(event: &TaskEvent) -> String {
    let deadline_line = match event.deadline {
        Some(deadline) => format!("Дедлайн: {}", deadline.format("%d.%m.%Y %H:%M")),
        None => "Дедлайн не установлен".to_string(),
    };

    format!(
        "🔴 <b>Срочная задача</b>\n\n\
         От: {creator}\n\n\
         Наименование задачи: <b>{title}</b>\n\
         Приоритет: {priority}\n\
         {deadline_line}\n\n\
         Детальная информация по ссылке: <a href=\"{link}\">Открыть задачу</a>",
        creator = escape_html(&event.creator_name),
        title = escape_html(&event.title),
        priority = priority_label(event.priority),
        link = event.link,
    )
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}
