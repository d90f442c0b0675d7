//! Initial prompt construction. The only thing worth getting wrong here
//! is leaking the absolute worktree path — the assistant must only ever
//! see the workspace through the abstracted "current directory" line, or
//! it can address the un-isolated main tree directly.

use engine_domain::model::Task;

const WORKDIR_LINE: &str = "Working directory: current directory (isolated branch)";

pub fn build_initial_prompt(task: &Task) -> String {
    let mut sections = vec![task.description.clone()];

    if !task.projects.is_empty() {
        let blocks: Vec<String> = task
            .projects
            .iter()
            .map(|p| {
                let mut block = format!("Project: {}\nPath: {}", p.name, p.path);
                if let Some(ctx) = &p.context {
                    block.push('\n');
                    block.push_str(ctx);
                }
                block
            })
            .collect();
        sections.push(blocks.join("\n---\n"));
    }

    if let Some(ctx) = &task.project_context {
        sections.push(ctx.clone());
    }

    sections.push(WORKDIR_LINE.to_string());

    sections.join("\n\n")
}
