use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::core::git::ChangeKind;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptConfig {
    pub system_prompt: String,
    pub user_prompt_template: String,
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            system_prompt: r#"You are a senior software engineer grading code changes. Judge each change against five criteria: Clean Code, SOLID principles, design patterns, testability and security. Score every criterion from 0 to 10 and justify each score in one or two sentences. Be concrete and refer to the code you were shown."#.to_string(),
            user_prompt_template: r#"<change>
File: {file_path}
Change: {change_kind}
Commit message: {commit_message}
</change>

<diff>
{diff}
</diff>

<instructions>
Reply with a single JSON object in a ```json fenced block, using exactly this shape:

{
  "analiseGeral": {
    "cleanCode": {
      "nota": 0,
      "comentario": "",
      "subcriterios": {
        "nomenclaturaVariaveis": {"nota": 0, "comentario": ""},
        "nomenclaturaMetodos": {"nota": 0, "comentario": ""},
        "tamanhoFuncoes": {"nota": 0, "comentario": ""},
        "usoComentarios": {"nota": 0, "comentario": ""},
        "duplicacaoCodigo": {"nota": 0, "comentario": ""}
      }
    },
    "solid": {"nota": 0, "comentario": ""},
    "designPatterns": {"nota": 0, "comentario": ""},
    "testabilidade": {"nota": 0, "comentario": ""},
    "seguranca": {"nota": 0, "comentario": ""}
  },
  "comentarioGeral": "",
  "propostaRefatoracao": {
    "titulo": "",
    "descricao": "",
    "codigoOriginal": "",
    "codigoRefatorado": "",
    "justificativa": "",
    "prioridade": 3
  }
}

Scores are numbers from 0 to 10. Omit "propostaRefatoracao" when no refactoring is worth proposing. Do not add text outside the JSON block.
</instructions>"#.to_string(),
        }
    }
}

/// The file under review. `diff` is expected to be already rendered and
/// size-capped.
#[derive(Debug, Clone)]
pub struct FileChange<'a> {
    pub file_path: &'a str,
    pub change_kind: &'a ChangeKind,
    pub commit_message: &'a str,
    pub diff: &'a str,
}

pub struct PromptBuilder {
    config: PromptConfig,
}

impl PromptBuilder {
    pub fn new(config: PromptConfig) -> Self {
        Self { config }
    }

    pub fn build_prompt(&self, change: &FileChange<'_>) -> Result<(String, String)> {
        let user_prompt = self
            .config
            .user_prompt_template
            .replace("{file_path}", change.file_path)
            .replace("{change_kind}", &describe_change(change.change_kind))
            .replace("{commit_message}", change.commit_message.trim())
            .replace("{diff}", change.diff.trim_end());

        Ok((self.config.system_prompt.clone(), user_prompt))
    }
}

fn describe_change(kind: &ChangeKind) -> String {
    match kind {
        ChangeKind::Added => "added".to_string(),
        ChangeKind::Modified => "modified".to_string(),
        ChangeKind::Deleted => "deleted".to_string(),
        ChangeKind::Renamed { from } => format!("renamed from {}", from),
    }
}
