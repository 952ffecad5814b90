use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use crate::bucket::FileAttachment;
use crate::message::{chain_message, error_detail_json, EventError, MessageContext, Service, TraceField};
use crate::payload::{Embed, EmbedField};

const COLOR_SUMMARY: u32 = 0x18_8544; // Green Jewel
const COLOR_ERROR: u32 = 0x71_010b; // Venetian Red
const COLOR_CONTEXT: u32 = 0x06_3970; // Dark Blue
const COLOR_ERROR_STACK: u32 = 0x5d_0e16; // Cardinal Red Dark
const COLOR_METADATA: u32 = 0x64_5a5b; // Scorpion Grey

const OVERFLOW_NOTICE: &str =
    "Content is too long to be displayed fully. See attachment for details";
const OVERFLOW_NOTICE_FENCED: &str =
    "\n```\nContent is too long to be displayed fully. See attachment for details";

/// Maximum number of fields one embed may carry.
const MAX_EMBED_FIELDS: usize = 25;

/// Named byte-budget constants for one notification.
///
/// The defaults are the external platform's limits; they are plain data
/// so embedders talking to a different endpoint can override them.
#[derive(Debug, Clone)]
pub struct BudgetConfig {
    /// Total inline content the platform accepts across all embeds.
    pub content_ceiling: usize,
    /// Slice reserved for titles and timestamps the transport always adds.
    pub content_reserve: usize,
    /// Summary section cap.
    pub summary_limit: usize,
    /// Metadata section cap.
    pub metadata_limit: usize,
    /// Error-stack section cap.
    pub error_stack_limit: usize,
    /// Largest slice any single section may claim.
    pub section_ceiling: usize,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            content_ceiling: 6000,
            content_reserve: 150,
            summary_limit: 500,
            metadata_limit: 500,
            error_stack_limit: 1000,
            section_ceiling: 4096,
        }
    }
}

/// Per-attempt derived metadata. Created fresh for every delivery
/// attempt and never persisted beyond it.
#[derive(Debug, Clone)]
pub struct ExtraInformation {
    /// How many times this dedup key has fired within its TTL window.
    pub iteration: u32,
    /// When the suppression window for this event ends.
    pub cooldown_ends: DateTime<Utc>,
    /// The resolved dedup cache key.
    pub cache_key: String,
    /// Unique, time-ordered id for this attempt.
    pub thread_id: Uuid,
    /// Whether suppression was bypassed for this attempt.
    pub force_send: bool,
}

pub(crate) struct BuiltContent {
    pub embeds: Vec<Embed>,
    pub files: Vec<FileAttachment>,
}

/// Intro line shown above the embeds.
pub(crate) fn build_intro(service: &Service, has_error: bool) -> String {
    let mut intro = String::with_capacity(96);
    if has_error {
        intro.push_str("@here an error has occurred");
    } else {
        intro.push_str("@here Message");
    }
    if !service.name.is_empty() {
        intro.push_str(" on service **");
        intro.push_str(&service.name);
        intro.push_str("**");
    }
    if !service.kind.is_empty() {
        intro.push_str(" on type **");
        intro.push_str(&service.kind);
        intro.push_str("**");
    }
    if !service.environment.is_empty() {
        intro.push_str(" on environment **");
        intro.push_str(&service.environment);
        intro.push_str("**");
    }
    intro
}

/// Packs one event into ordered sections under the shared byte budget,
/// diverting overflow to file attachments.
pub(crate) fn build_content(
    msg: &dyn MessageContext,
    extra: &ExtraInformation,
    trace: &[TraceField],
    budget: &BudgetConfig,
) -> BuiltContent {
    let mut limit = budget.content_ceiling.saturating_sub(budget.content_reserve);

    let (summary, file_summary, written) =
        build_summary(msg, budget.summary_limit.min(limit), extra);
    limit = limit.saturating_sub(written);

    let (metadata, file_metadata, written) =
        build_metadata(msg, extra, trace, budget.metadata_limit.min(limit));
    limit = limit.saturating_sub(written);

    let (error_stack, file_error_stack, written) =
        build_error_stack(msg, budget.error_stack_limit.min(limit), extra);
    limit = limit.saturating_sub(written);

    // Context is the largest and least bounded payload: it may claim half
    // of what remains when an error still needs room, or everything up to
    // the section ceiling when it is the only heavyweight left.
    let context_limit = if msg.err().is_some() {
        limit / 2
    } else {
        limit.min(budget.section_ceiling)
    };
    let (context, file_context, written) = build_context(msg, context_limit, extra);
    limit = limit.saturating_sub(written);

    // The error detail takes whatever is left.
    let error_limit = limit.min(budget.section_ceiling);
    let (error_detail, file_error, _written) = build_error_detail(msg, error_limit, extra);

    let mut embeds = Vec::with_capacity(5);
    embeds.push(summary);
    if let Some(embed) = error_detail {
        embeds.push(embed);
    }
    if let Some(embed) = context {
        embeds.push(embed);
    }
    if let Some(embed) = error_stack {
        embeds.push(embed);
    }
    embeds.push(metadata);

    let mut files = Vec::with_capacity(5);
    for file in [
        file_summary,
        file_error,
        file_context,
        file_error_stack,
        file_metadata,
    ]
    .into_iter()
    .flatten()
    {
        files.push(file);
    }

    BuiltContent { embeds, files }
}

struct SectionDraft {
    embed: Embed,
    display: String,
    /// Untruncated content offered as a file when the display overflows.
    /// `None` means the display text itself is the full content.
    full: Option<Bytes>,
    content_type: &'static str,
    extension: &'static str,
    suffix: &'static str,
}

/// Finishes one section: truncates the display when it exceeds `limit`,
/// keeps code fences balanced, and emits the untruncated content as a
/// candidate file attachment.
fn finish_section(
    draft: SectionDraft,
    limit: usize,
    extra: &ExtraInformation,
) -> (Embed, Option<FileAttachment>, usize) {
    let SectionDraft {
        mut embed,
        display,
        full,
        content_type,
        extension,
        suffix,
    } = draft;

    if display.len() <= limit {
        let written = display.len();
        embed.description = display;
        return (embed, None, written);
    }

    let truncated = truncate_with_notice(&display, limit);
    let written = truncated.len();
    embed.description = truncated;

    let filename = format!("{}{}.{}", extra.thread_id.simple(), suffix, extension);
    let content = full.unwrap_or_else(|| Bytes::from(display.into_bytes()));
    let file = FileAttachment::new(filename, content_type, content)
        .with_pretext(embed.title.clone());
    (embed, Some(file), written)
}

fn truncate_with_notice(display: &str, limit: usize) -> String {
    let keep = truncate_at_char_boundary(display, limit.saturating_sub(OVERFLOW_NOTICE.len()));
    if fences_balanced(keep) {
        return format!("{keep}{OVERFLOW_NOTICE}");
    }
    // The cut landed inside a fenced block: close it before the notice.
    // Re-truncating for the longer notice can move the cut back out of
    // the block, in which case the plain notice applies after all.
    let keep =
        truncate_at_char_boundary(display, limit.saturating_sub(OVERFLOW_NOTICE_FENCED.len()));
    if fences_balanced(keep) {
        format!("{keep}{OVERFLOW_NOTICE}")
    } else {
        format!("{keep}{OVERFLOW_NOTICE_FENCED}")
    }
}

fn fences_balanced(text: &str) -> bool {
    text.matches("```").count() % 2 == 0
}

fn truncate_at_char_boundary(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut cut = max;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    &text[..cut]
}

fn build_summary(
    msg: &dyn MessageContext,
    limit: usize,
    extra: &ExtraInformation,
) -> (Embed, Option<FileAttachment>, usize) {
    let embed = Embed::new("Summary", COLOR_SUMMARY);
    let mut display = String::with_capacity(limit);

    display.push_str("**");
    display.push_str(msg.message());
    display.push_str("**");

    if let Some(err) = msg.err() {
        display.push_str("\n\n**Error**:\n```\n");
        display.push_str(&chain_message(err));
        display.push_str("\n```");
    }

    let context = msg.context();
    if !context.is_empty() {
        display.push_str("\n\n**Context**:\n```json\n");
        match serde_json::to_string(&context_value(context)) {
            Ok(excerpt) => display.push_str(&excerpt),
            Err(err) => display.push_str(&format!("error rendering context: {err}")),
        }
        display.push_str("\n```");
    }

    finish_section(
        SectionDraft {
            embed,
            display,
            full: None,
            content_type: "text/markdown; charset=utf-8",
            extension: "md",
            suffix: "_summary",
        },
        limit,
        extra,
    )
}

fn build_metadata(
    msg: &dyn MessageContext,
    extra: &ExtraInformation,
    trace: &[TraceField],
    limit: usize,
) -> (Embed, Option<FileAttachment>, usize) {
    let mut embed = Embed::new("Metadata", COLOR_METADATA);
    embed.timestamp = msg.time().to_rfc3339();

    let mut count = 0usize;
    for field in trace {
        count += field.key.len() + field.value.len();
        embed
            .fields
            .push(EmbedField::inline(field.key.clone(), field.value.clone()));
    }

    let service = msg.service();
    if !service.name.is_empty() {
        count += "Service".len() + service.name.len();
        embed
            .fields
            .push(EmbedField::inline("Service", service.name.clone()));
    }
    if !service.kind.is_empty() {
        count += "Type".len() + service.kind.len();
        embed
            .fields
            .push(EmbedField::inline("Type", service.kind.clone()));
    }
    if !service.environment.is_empty() {
        count += "Environment".len() + service.environment.len();
        embed
            .fields
            .push(EmbedField::inline("Environment", service.environment.clone()));
    }

    let thread_id = extra.thread_id.simple().to_string();
    count += "Thread ID".len() + thread_id.len();
    embed.fields.push(EmbedField::inline("Thread ID", thread_id));

    let iteration = if extra.force_send {
        "(Force Send)".to_owned()
    } else {
        extra.iteration.to_string()
    };
    count += "Message Iteration".len() + iteration.len();
    embed
        .fields
        .push(EmbedField::inline("Message Iteration", iteration));

    let ts = extra.cooldown_ends.timestamp();
    let repeat = format!("<t:{ts}:F> | <t:{ts}:R>");
    count += "Next Possible Earliest Repeat".len() + repeat.len();
    embed
        .fields
        .push(EmbedField::block("Next Possible Earliest Repeat", repeat));

    embed.fields.truncate(MAX_EMBED_FIELDS);

    let mut display = String::with_capacity(limit.min(512));
    display.push_str("**Caller Origin**\n```\n");
    display.push_str(&msg.caller().to_string());
    display.push_str("\n```\n");
    if let Some(function) = &msg.caller().function {
        display.push_str("**Caller Function**\n```\n");
        display.push_str(function);
        display.push_str("\n```\n");
    }
    display.push_str("**Cache Key**\n```\n");
    display.push_str(&extra.cache_key);
    display.push_str("\n```");

    let full = if display.len() > limit {
        let mut data = display.clone();
        data.push_str("\n```json\n");
        match serde_json::to_string_pretty(&embed.fields) {
            Ok(fields) => data.push_str(&fields),
            Err(err) => data.push_str(&format!("error rendering fields: {err}")),
        }
        data.push_str("\n```");
        Some(Bytes::from(data.into_bytes()))
    } else {
        None
    };

    let (embed, file, written) = finish_section(
        SectionDraft {
            embed,
            display,
            full,
            content_type: "text/markdown; charset=utf-8",
            extension: "md",
            suffix: "_metadata",
        },
        limit,
        extra,
    );
    (embed, file, count + written)
}

fn build_error_stack(
    msg: &dyn MessageContext,
    limit: usize,
    extra: &ExtraInformation,
) -> (Option<Embed>, Option<FileAttachment>, usize) {
    let Some(err) = msg.err() else {
        return (None, None, 0);
    };

    let mut lines = Vec::with_capacity(4);
    let mut current: Option<&dyn EventError> = Some(err);
    while let Some(e) = current {
        match e.caller() {
            Some(caller) => lines.push(format!("{caller}: {}", e.message())),
            None => lines.push(e.message()),
        }
        current = e.cause();
    }
    if lines.is_empty() {
        return (None, None, 0);
    }
    // Root cause first.
    lines.reverse();
    let content = lines.join("\n---\n");

    let mut display = String::with_capacity(content.len() + 8);
    display.push_str("```\n");
    display.push_str(&content);
    display.push_str("\n```");

    let full = if display.len() > limit {
        Some(Bytes::from(content.into_bytes()))
    } else {
        None
    };

    let embed = Embed::new("Error Stack", COLOR_ERROR_STACK);
    let (embed, file, written) = finish_section(
        SectionDraft {
            embed,
            display,
            full,
            content_type: "text/plain; charset=utf-8",
            extension: "txt",
            suffix: "_error_stack",
        },
        limit,
        extra,
    );
    (Some(embed), file, written)
}

fn build_context(
    msg: &dyn MessageContext,
    limit: usize,
    extra: &ExtraInformation,
) -> (Option<Embed>, Option<FileAttachment>, usize) {
    let context = msg.context();
    if context.is_empty() {
        return (None, None, 0);
    }

    let value = context_value(context);
    let mut display = String::with_capacity(limit.min(1024));
    display.push_str("```json\n");
    match serde_json::to_string_pretty(&value) {
        Ok(rendered) => display.push_str(&rendered),
        Err(err) => display.push_str(&format!("error rendering context: {err}")),
    }
    display.push_str("\n```");

    let full = if display.len() > limit {
        match serde_json::to_vec_pretty(&value) {
            Ok(data) => Some(Bytes::from(data)),
            Err(_) => None,
        }
    } else {
        None
    };

    let embed = Embed::new("Context", COLOR_CONTEXT);
    let (embed, file, written) = finish_section(
        SectionDraft {
            embed,
            display,
            full,
            content_type: "application/json",
            extension: "json",
            suffix: "_context",
        },
        limit,
        extra,
    );
    (Some(embed), file, written)
}

fn build_error_detail(
    msg: &dyn MessageContext,
    limit: usize,
    extra: &ExtraInformation,
) -> (Option<Embed>, Option<FileAttachment>, usize) {
    let Some(err) = msg.err() else {
        return (None, None, 0);
    };

    let detail = error_detail_json(err);
    let mut display = String::with_capacity(limit.min(1024));
    display.push_str("```json\n");
    match serde_json::to_string_pretty(&detail) {
        Ok(rendered) => display.push_str(&rendered),
        Err(render_err) => display.push_str(&format!("error rendering error: {render_err}")),
    }
    display.push_str("\n```");

    let full = if display.len() > limit {
        match serde_json::to_vec_pretty(&detail) {
            Ok(data) => Some(Bytes::from(data)),
            Err(_) => None,
        }
    } else {
        None
    };

    let embed = Embed::new("Error", COLOR_ERROR);
    let (embed, file, written) = finish_section(
        SectionDraft {
            embed,
            display,
            full,
            content_type: "application/json",
            extension: "json",
            suffix: "_error",
        },
        limit,
        extra,
    );
    (Some(embed), file, written)
}

/// A single context item is rendered as-is; several become a JSON array.
fn context_value(context: &[Value]) -> Value {
    if context.len() == 1 {
        context[0].clone()
    } else {
        Value::Array(context.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Caller, ErrorInfo, EventMessage, Level};
    use serde_json::json;

    fn extra() -> ExtraInformation {
        ExtraInformation {
            iteration: 1,
            cooldown_ends: Utc::now(),
            cache_key: "svc::prod::key".to_owned(),
            thread_id: Uuid::now_v7(),
            force_send: false,
        }
    }

    fn message() -> EventMessage {
        EventMessage::new("database unreachable")
            .with_level(Level::Error)
            .with_service(
                Service::new("checkout")
                    .with_environment("production")
                    .with_kind("http"),
            )
            .with_caller(Caller::new("src/db.rs", 10))
    }

    #[test]
    fn intro_names_service_kind_and_environment() {
        let service = Service::new("checkout")
            .with_environment("production")
            .with_kind("http");
        let intro = build_intro(&service, true);
        assert_eq!(
            intro,
            "@here an error has occurred on service **checkout** on type **http** on environment **production**"
        );
        assert!(build_intro(&service, false).starts_with("@here Message"));
    }

    #[test]
    fn zero_context_produces_no_section_and_no_file() {
        let msg = message();
        let built = build_content(&msg, &extra(), &[], &BudgetConfig::default());
        assert!(built.embeds.iter().all(|e| e.title != "Context"));
        assert!(built
            .files
            .iter()
            .all(|f| !f.filename().ends_with("_context.json")));
    }

    #[test]
    fn oversized_context_truncates_and_produces_file() {
        let big: String = "x".repeat(10_000);
        let msg = message().with_context(json!({ "blob": big }));
        let built = build_content(&msg, &extra(), &[], &BudgetConfig::default());

        let context = built
            .embeds
            .iter()
            .find(|e| e.title == "Context")
            .expect("context embed");
        assert!(context.description.ends_with(OVERFLOW_NOTICE));
        assert!(fences_balanced(&context.description));

        let file = built
            .files
            .iter()
            .find(|f| f.filename().ends_with("_context.json"))
            .expect("context overflow file");
        let full: Value = serde_json::from_slice(file.content()).unwrap();
        assert_eq!(full["blob"].as_str().unwrap().len(), 10_000);
    }

    #[test]
    fn truncation_closes_open_code_fence() {
        // Cut lands in the middle of the fenced JSON block.
        let big: String = "y".repeat(2_000);
        let msg = message().with_context(json!({ "blob": big }));
        let (embed, file, _written) = build_context(&msg, 400, &extra());
        let embed = embed.expect("embed");
        assert!(file.is_some());
        assert!(embed.description.len() <= 400);
        assert!(fences_balanced(&embed.description));
        assert!(embed.description.ends_with(OVERFLOW_NOTICE));
    }

    #[test]
    fn summary_within_limit_is_untouched() {
        let msg = message();
        let (embed, file, written) = build_summary(&msg, 500, &extra());
        assert!(file.is_none());
        assert_eq!(written, embed.description.len());
        assert_eq!(embed.description, "**database unreachable**");
    }

    #[test]
    fn summary_includes_error_excerpt() {
        let msg = message().with_error(
            ErrorInfo::new("query failed").wrap(ErrorInfo::new("connection refused")),
        );
        let (embed, _, _) = build_summary(&msg, 500, &extra());
        assert!(embed
            .description
            .contains("query failed: connection refused"));
    }

    #[test]
    fn error_stack_is_reversed_root_first() {
        let msg = message().with_error(
            ErrorInfo::new("handler failed")
                .with_caller(Caller::new("src/api.rs", 5))
                .wrap(ErrorInfo::new("io failure").with_caller(Caller::new("src/io.rs", 9))),
        );
        let (embed, _, _) = build_error_stack(&msg, 1000, &extra());
        let description = embed.expect("stack embed").description;
        let io_at = description.find("src/io.rs:9").expect("io line");
        let api_at = description.find("src/api.rs:5").expect("api line");
        assert!(io_at < api_at, "root cause must come first");
        assert!(description.contains("\n---\n"));
    }

    #[test]
    fn no_error_omits_stack_and_detail_sections() {
        let msg = message();
        let built = build_content(&msg, &extra(), &[], &BudgetConfig::default());
        let titles: Vec<_> = built.embeds.iter().map(|e| e.title.as_str()).collect();
        assert_eq!(titles, vec!["Summary", "Metadata"]);
    }

    #[test]
    fn metadata_lists_iteration_and_next_repeat() {
        let msg = message();
        let (embed, _, _) = build_metadata(&msg, &extra(), &[], 500);
        let names: Vec<_> = embed.fields.iter().map(|f| f.name.as_str()).collect();
        assert!(names.contains(&"Service"));
        assert!(names.contains(&"Thread ID"));
        assert!(names.contains(&"Message Iteration"));
        assert!(names.contains(&"Next Possible Earliest Repeat"));
        assert!(embed.description.contains("src/db.rs:10"));
        assert!(embed.description.contains("svc::prod::key"));
    }

    #[test]
    fn force_send_shows_in_metadata() {
        let msg = message();
        let mut info = extra();
        info.force_send = true;
        let (embed, _, _) = build_metadata(&msg, &info, &[], 500);
        let iteration = embed
            .fields
            .iter()
            .find(|f| f.name == "Message Iteration")
            .expect("iteration field");
        assert_eq!(iteration.value, "(Force Send)");
    }

    #[test]
    fn trace_fields_lead_the_metadata_embed() {
        let msg = message();
        let trace = vec![TraceField::new("Request ID", "abc-123")];
        let (embed, _, _) = build_metadata(&msg, &extra(), &trace, 500);
        assert_eq!(embed.fields[0].name, "Request ID");
        assert_eq!(embed.fields[0].value, "abc-123");
    }

    #[test]
    fn inline_budget_never_exceeds_ceiling() {
        let big: String = "z".repeat(20_000);
        let msg = message()
            .with_error(ErrorInfo::new(big.clone()))
            .with_context(json!({ "blob": big }));
        let budget = BudgetConfig::default();
        let built = build_content(&msg, &extra(), &[], &budget);
        let inline: usize = built.embeds.iter().map(|e| e.description.len()).sum();
        assert!(
            inline <= budget.content_ceiling - budget.content_reserve,
            "inline content {inline} exceeds budget"
        );
    }

    #[test]
    fn overflow_files_are_named_by_thread_id() {
        let big: String = "w".repeat(10_000);
        let msg = message().with_context(json!({ "blob": big }));
        let info = extra();
        let built = build_content(&msg, &info, &[], &BudgetConfig::default());
        let prefix = info.thread_id.simple().to_string();
        assert!(built.files.iter().all(|f| f.filename().starts_with(&prefix)));
    }
}
