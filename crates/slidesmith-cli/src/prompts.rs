//! Role prompts and the slide scaffolding the designer fills in

use slidesmith_agent::Language;
use std::path::PathBuf;

use crate::phase::Phase;
use crate::plan::{SlideSpec, slide_relative_path};

const COLLECTOR_PROMPT: &str = "\
You are the research assistant of a presentation studio. Explore the files in \
the workspace, read what is relevant to the user's request and collect the \
facts, figures and structure a presentation will need. When you have enough, \
call phase_complete with phase \"collecting\" and a summary that a planner \
can work from without re-reading the files.";

const ARCHITECT_PROMPT: &str = "\
You are the architect of a presentation. From the collected material, design \
a clear outline: a title, a theme, and an ordered list of slides, each with a \
title, the key points it carries, optional speaker notes and a layout hint. \
Save the outline with update_presentation_plan, then call phase_complete with \
phase \"architect\" and a short description of the plan.";

const DESIGNER_PROMPT: &str = "\
You are the designer of a single presentation slide. Each slide is a \
standalone 1920x1080 HTML page styled with Tailwind CSS; Chart.js is \
available for charts. Keep the page free of scrolling, use a light \
background and dense, well structured content: bordered cards, badges, \
callouts, tables and charts. Always save your work with write_file; HTML \
pasted into a reply is discarded.";

/// Prompt for each agent role, optionally overridden from a directory.
///
/// A file named after the role (`collector`, `architect`, `designer`), bare or
/// with a `.txt` or `.md` extension, replaces the built-in text.
#[derive(Debug, Clone, Default)]
pub struct Prompts {
    dir: Option<PathBuf>,
}

impl Prompts {
    pub fn new(dir: Option<PathBuf>) -> Self {
        Self { dir }
    }

    pub fn load(&self, name: &str) -> String {
        if let Some(dir) = &self.dir {
            for ext in ["", ".txt", ".md"] {
                let candidate = dir.join(format!("{}{}", name, ext));
                match std::fs::read_to_string(&candidate) {
                    Ok(text) => return text,
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => {
                        tracing::warn!(path = %candidate.display(), "failed to read prompt: {}", e);
                    }
                }
            }
        }
        builtin(name).to_string()
    }

    pub fn for_phase(&self, phase: Phase) -> String {
        self.load(role_for_phase(phase))
    }

    pub fn designer(&self) -> String {
        self.load("designer")
    }
}

fn builtin(name: &str) -> &'static str {
    match name {
        "architect" => ARCHITECT_PROMPT,
        "designer" => DESIGNER_PROMPT,
        _ => COLLECTOR_PROMPT,
    }
}

/// Which role drives a phase
pub fn role_for_phase(phase: Phase) -> &'static str {
    match phase {
        Phase::Architect | Phase::EditingPlan => "architect",
        Phase::Designing => "designer",
        Phase::Collecting | Phase::Completed => "collector",
    }
}

/// Minimal escaping for text placed inside HTML markup
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

/// Placeholder page written for every slide before any designer runs
pub fn slide_template(index: usize, title: &str, total: usize) -> String {
    let number = index + 1;
    let title = escape_html(title);
    format!(
        r#"<!DOCTYPE html>
<html lang="zh-CN">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>Slide {number} - {title}</title>
    <link rel="preconnect" href="https://fonts.googleapis.com">
    <link rel="preconnect" href="https://fonts.gstatic.com" crossorigin>
    <link href="https://fonts.googleapis.com/css2?family=Noto+Sans+SC:wght@400;500;700&display=swap" rel="stylesheet">
    <script src="https://cdn.tailwindcss.com"></script>
    <script src="https://cdn.jsdelivr.net/npm/chart.js"></script>
    <style>
        html, body {{
            margin: 0;
            padding: 0;
            width: 100vw;
            height: 100vh;
            overflow: hidden;
            font-family: 'Noto Sans SC', 'Microsoft YaHei', 'Inter', -apple-system, BlinkMacSystemFont, sans-serif;
        }}
        .slide-container {{
            width: 100%;
            height: 100%;
        }}
    </style>
</head>
<body class="bg-white">
    <div class="fixed bottom-4 right-4 text-sm text-gray-400">
        {number} / {total}
    </div>
    <div id="content" class="slide-container">
        <div class="h-full flex items-center justify-center text-gray-800">
            <div class="text-center">
                <div class="text-6xl mb-4">⏳</div>
                <div class="text-2xl">Generating...</div>
            </div>
        </div>
    </div>
</body>
</html>
"#
    )
}

/// Full document around a bare content fragment
pub fn wrap_fragment(fragment: &str, title: &str) -> String {
    let title = escape_html(title);
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=1920, height=1080">
    <title>{title}</title>
    <script src="https://cdn.tailwindcss.com"></script>
    <script src="https://cdn.jsdelivr.net/npm/chart.js"></script>
    <style>
        body {{
            margin: 0;
            width: 1920px;
            height: 1080px;
            overflow: hidden;
        }}
        .slide-container {{
            width: 100%;
            height: 100%;
            padding: 40px;
            box-sizing: border-box;
        }}
    </style>
</head>
<body>
    <div id="content" class="slide-container">
        {fragment}
    </div>
</body>
</html>"#
    )
}

/// Page shown in place of a slide the designer did not produce
pub fn error_page(index: usize, title: &str, reason: &str) -> String {
    let number = index + 1;
    let title = escape_html(title);
    let reason = escape_html(reason);
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=1920, height=1080">
    <title>Error - Slide {number}</title>
    <style>
        body {{
            margin: 0;
            padding: 40px;
            width: 1920px;
            height: 1080px;
            box-sizing: border-box;
            font-family: Arial, sans-serif;
            display: flex;
            flex-direction: column;
            align-items: center;
            justify-content: center;
            background: #fef2f2;
            color: #991b1b;
        }}
        h1 {{ font-size: 48px; margin-bottom: 20px; }}
        p {{ font-size: 24px; }}
    </style>
</head>
<body>
    <h1>⚠️ Generation Error</h1>
    <p>{reason}</p>
    <p>Slide: {title}</p>
</body>
</html>"#
    )
}

/// Task message for one slide's designer agent
pub fn slide_prompt(
    index: usize,
    slide: &SlideSpec,
    design_context: Option<&str>,
    language: Language,
) -> String {
    let path = slide_relative_path(index);
    let slide_id = format!("slide_{}", index + 1);
    let labels = match language {
        Language::Zh => ["标题", "内容", "演讲备注", "布局建议", "设计上下文"],
        Language::En => ["Title", "Content", "Speaker notes", "Layout", "Design context"],
    };

    let mut parts = vec![format!("**{}:** {}", labels[0], slide.title)];
    if !slide.content.is_empty() {
        let items = slide
            .content
            .iter()
            .map(|item| format!("- {}", item))
            .collect::<Vec<_>>()
            .join("\n");
        parts.push(format!("**{}:**\n{}", labels[1], items));
    }
    if let Some(notes) = &slide.notes {
        parts.push(format!("**{}:** {}", labels[2], notes));
    }
    if let Some(layout) = &slide.layout {
        parts.push(format!("**{}:** {}", labels[3], layout));
    }
    if let Some(context) = design_context.filter(|c| !c.is_empty()) {
        parts.push(format!("**{}:** {}", labels[4], context));
    }
    let description = parts.join("\n\n");

    match language {
        Language::Zh => format!(
            "请为幻灯片 {slide_id} 设计并生成专业的 HTML 内容。\n\n\
             {description}\n\n\
             **步骤（按顺序执行）：**\n\
             1. 使用 `read_file` 读取当前文件：{path}\n\
             2. 分析内容中的数据点、关系和层次结构\n\
             3. 选择合适的视觉组件呈现内容\n\
             4. 使用 `write_file` 将完整的 HTML 写入：{path}\n\n\
             必须通过 write_file 保存文件，替换 `<div id=\"content\" class=\"slide-container\">` \
             内的占位内容，并保留 head 中的 Tailwind 和 Chart.js 引用。\n\
             完成后调用 task_completed。\n\n\
             **输出文件路径：** {path}\n"
        ),
        Language::En => format!(
            "Design and generate professional HTML for slide {slide_id}.\n\n\
             {description}\n\n\
             **Steps (in order):**\n\
             1. Read the current file with `read_file`: {path}\n\
             2. Identify the data points, relationships and hierarchy in the content\n\
             3. Pick visual components that fit the content\n\
             4. Write the complete HTML with `write_file` to: {path}\n\n\
             The file must be saved with write_file. Replace the placeholder inside \
             `<div id=\"content\" class=\"slide-container\">` and keep the Tailwind and \
             Chart.js references in the head.\n\
             Call task_completed when done.\n\n\
             **Output path:** {path}\n"
        ),
    }
}
