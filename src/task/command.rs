//! Worker command line construction.

use std::path::PathBuf;

use crate::config::WorkerConfig;

use super::record::CreateTaskRequest;

/// A fully resolved worker process invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerInvocation {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
}

impl WorkerInvocation {
    /// Command line for log output.
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Build `codex exec [resume] --json ...` for a request.
///
/// `codex exec resume` does not accept `--sandbox`, so on that path the
/// sandbox intent only survives through the full-auto approval flags below.
pub fn build(worker: &WorkerConfig, req: &CreateTaskRequest) -> WorkerInvocation {
    let mut args: Vec<String> = worker.launcher_args.clone();
    args.push("exec".into());
    if req.resume_session_id.is_some() {
        args.push("resume".into());
    }
    args.extend(["--json".into(), "--skip-git-repo-check".into()]);
    args.extend(["--model".into(), req.model.clone()]);
    if req.resume_session_id.is_none() {
        args.extend(["--sandbox".into(), req.sandbox.clone()]);
    }
    args.extend([
        "-c".into(),
        format!("model_reasoning_effort=\"{}\"", req.reasoning_effort),
    ]);

    if req.full_auto {
        match req.sandbox.as_str() {
            "workspace-write" => args.push("--full-auto".into()),
            "danger-full-access" => {
                args.push("--dangerously-bypass-approvals-and-sandbox".into())
            }
            _ => args.extend(["-c".into(), "approval_policy=\"never\"".into()]),
        }
    }

    if let Some(session_id) = &req.resume_session_id {
        args.push(session_id.clone());
    }
    args.push(req.prompt.clone());

    WorkerInvocation {
        program: worker.binary.clone(),
        args,
        cwd: PathBuf::from(&req.cwd),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn worker() -> WorkerConfig {
        WorkerConfig::default()
    }

    fn args(inv: &WorkerInvocation) -> Vec<&str> {
        inv.args.iter().map(String::as_str).collect()
    }

    #[test]
    fn test_fresh_invocation() {
        let mut req = CreateTaskRequest::new("fix the tests");
        req.sandbox = "read-only".into();
        req.full_auto = false;
        let inv = build(&worker(), &req);

        assert_eq!(inv.program, "codex");
        assert_eq!(
            args(&inv),
            vec![
                "exec",
                "--json",
                "--skip-git-repo-check",
                "--model",
                "gpt-5.3-codex",
                "--sandbox",
                "read-only",
                "-c",
                "model_reasoning_effort=\"high\"",
                "fix the tests",
            ]
        );
    }

    #[test]
    fn test_full_auto_flag_mapping() {
        let mut req = CreateTaskRequest::new("p");

        req.sandbox = "workspace-write".into();
        assert!(args(&build(&worker(), &req)).contains(&"--full-auto"));

        req.sandbox = "danger-full-access".into();
        assert!(args(&build(&worker(), &req))
            .contains(&"--dangerously-bypass-approvals-and-sandbox"));

        req.sandbox = "read-only".into();
        let inv = build(&worker(), &req);
        let a = args(&inv);
        assert!(a.contains(&"approval_policy=\"never\""));
        assert!(!a.contains(&"--full-auto"));
    }

    #[test]
    fn test_resume_drops_sandbox_flag() {
        let mut req = CreateTaskRequest::new("continue");
        req.resume_session_id = Some("sess-1".into());
        req.sandbox = "workspace-write".into();
        let inv = build(&worker(), &req);
        let a = args(&inv);

        assert_eq!(&a[..2], &["exec", "resume"]);
        assert!(!a.contains(&"--sandbox"));
        assert!(a.contains(&"--full-auto"));
        assert_eq!(&a[a.len() - 2..], &["sess-1", "continue"]);
    }

    #[test]
    fn test_launcher_args_and_cwd() {
        let worker = WorkerConfig {
            binary: "npx".into(),
            launcher_args: vec!["codex".into()],
        };
        let mut req = CreateTaskRequest::new("p");
        req.cwd = "/tmp/project".into();
        let inv = build(&worker, &req);

        assert_eq!(inv.program, "npx");
        assert_eq!(&args(&inv)[..2], &["codex", "exec"]);
        assert_eq!(inv.cwd, PathBuf::from("/tmp/project"));
        assert!(inv.display().starts_with("npx codex exec --json"));
    }
}
