//! Recursive task-graph expansion with re-entry-counter cycle detection,
//! matching the source system's `preparer.go` exactly (see DESIGN.md for why
//! this is kept over a Kahn's-algorithm topological walk): the Plan's
//! "duplicate occurrences are retained" invariant is incompatible with a
//! dedup-by-construction DAG walk.

use std::collections::HashMap;

use ops_model::{Manifest, ParseError, Plan, Task, TaskDescriptor, TransferSpec};

pub struct Planner<'a> {
    manifest: &'a Manifest,
    process_env: HashMap<String, String>,
    cli_env: HashMap<String, String>,
    counter: HashMap<String, u32>,
}

impl<'a> Planner<'a> {
    pub fn new(manifest: &'a Manifest, cli_env: HashMap<String, String>) -> Self {
        Self {
            manifest,
            process_env: std::env::vars().collect(),
            cli_env,
            counter: HashMap::new(),
        }
    }

    pub fn plan(&mut self, requested: &[String]) -> Result<Plan, ParseError> {
        let mut plan = Vec::new();
        for name in requested {
            self.expand(name, &mut plan)?;
        }
        Ok(plan)
    }

    fn expand(&mut self, task_name: &str, plan: &mut Plan) -> Result<(), ParseError> {
        let task = self
            .manifest
            .tasks
            .get(task_name)
            .ok_or_else(|| ParseError::new(task_name, "not a valid task"))?
            .clone();

        if !task.dependencies.is_empty() {
            let current = {
                let entry = self.counter.entry(task_name.to_string()).or_insert(0);
                *entry += 1;
                *entry
            };
            for dep in &task.dependencies {
                let dep_task = self
                    .manifest
                    .tasks
                    .get(dep)
                    .ok_or_else(|| ParseError::new(dep, "not a valid task"))?;
                if current > 1 && !dep_task.dependencies.is_empty() {
                    return Err(ParseError::new(task_name, "circular task node"));
                }
                self.expand(dep, plan)?;
            }
        }
        plan.push(self.materialize(task_name, &task)?);
        Ok(())
    }

    fn materialize(&self, name: &str, task: &Task) -> Result<TaskDescriptor, ParseError> {
        let merged_env = ops_model::merge_environments(
            &self.process_env,
            &self.manifest.environments,
            &task.environments,
            &self.cli_env,
        );
        let shell = task.shell.clone().unwrap_or_else(|| self.manifest.shell.clone());

        if let Some(raw) = &task.transfer {
            let (src_raw, dest) = ops_model::parse_transfer(raw)
                .map_err(|e| ParseError::new(name, e.to_string()))?;
            let expanded_src = expand_vars(&src_raw, &merged_env);
            let src_path = std::path::Path::new(&expanded_src);
            let abs_src = if src_path.is_absolute() {
                src_path.to_path_buf()
            } else {
                std::env::current_dir()
                    .unwrap_or_default()
                    .join(src_path)
            };
            Ok(TaskDescriptor {
                name: name.to_string(),
                description: task.desc.clone(),
                shell,
                commands: vec![format!("tar -C {} -xvzf - ", dest)],
                environments: merged_env,
                transfer: Some(TransferSpec {
                    src: abs_src,
                    dest,
                }),
                sudo: task.sudo,
                local: false,
                prompt: task.prompt.clone(),
            })
        } else {
            let command = task
                .command
                .clone()
                .expect("validated at manifest load: command XOR transfer");
            Ok(TaskDescriptor {
                name: name.to_string(),
                description: task.desc.clone(),
                shell,
                commands: vec![command],
                environments: merged_env,
                transfer: None,
                sudo: task.sudo,
                local: task.local,
                prompt: task.prompt.clone(),
            })
        }
    }
}

/// Minimal `${VAR}` expansion against the merged environment (mirrors Go's
/// `os.Expand`). Unknown variables expand to the empty string.
fn expand_vars(raw: &str, env: &HashMap<String, String>) -> String {
    let mut out = String::with_capacity(raw.len());
    let bytes = raw.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'$' && i + 1 < bytes.len() && bytes[i + 1] == b'{' {
            if let Some(end) = raw[i + 2..].find('}') {
                let var = &raw[i + 2..i + 2 + end];
                out.push_str(env.get(var).map(String::as_str).unwrap_or(""));
                i += 2 + end + 1;
                continue;
            }
        }
        out.push(raw[i..].chars().next().unwrap());
        i += raw[i..].chars().next().unwrap().len_utf8();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest(yaml: &str) -> Manifest {
        Manifest::parse(yaml).unwrap()
    }

    #[test]
    fn plan_ordering_puts_deps_before_task() {
        let m = manifest(
            r#"
tasks:
  first:
    command: echo 1
  second:
    command: echo 2
    dependencies: [first]
  third:
    command: echo 3
    dependencies: [second]
"#,
        );
        let plan = Planner::new(&m, HashMap::new())
            .plan(&["third".to_string()])
            .unwrap();
        let names: Vec<&str> = plan.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["first", "second", "third"]);
    }

    #[test]
    fn duplicate_occurrences_are_retained() {
        let m = manifest(
            r#"
tasks:
  a:
    command: echo a
  b:
    command: echo b
    dependencies: [a]
  c:
    command: echo c
    dependencies: [a, b]
"#,
        );
        let plan = Planner::new(&m, HashMap::new())
            .plan(&["c".to_string()])
            .unwrap();
        let names: Vec<&str> = plan.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["a", "a", "b", "c"]);
    }

    #[test]
    fn cycle_detection_rejects_mutual_dependency() {
        let m = manifest(
            r#"
tasks:
  a:
    command: echo a
    dependencies: [b]
  b:
    command: echo b
    dependencies: [a]
"#,
        );
        let err = Planner::new(&m, HashMap::new())
            .plan(&["a".to_string()])
            .unwrap_err();
        assert!(err.to_string().contains("circular"));
    }

    #[test]
    fn idempotent_plan_with_fresh_state() {
        let m = manifest(
            r#"
tasks:
  a:
    command: echo a
  b:
    command: echo b
    dependencies: [a]
"#,
        );
        let plan1 = Planner::new(&m, HashMap::new())
            .plan(&["b".to_string()])
            .unwrap();
        let plan2 = Planner::new(&m, HashMap::new())
            .plan(&["b".to_string()])
            .unwrap();
        let names1: Vec<&str> = plan1.iter().map(|t| t.name.as_str()).collect();
        let names2: Vec<&str> = plan2.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names1, names2);
    }

    #[test]
    fn env_merge_precedence_on_descriptor() {
        let m = manifest(
            r#"
environments:
  A: global
tasks:
  t:
    command: echo hi
    environments:
      A: task
"#,
        );
        let mut cli = HashMap::new();
        cli.insert("A".to_string(), "cli".to_string());
        let plan = Planner::new(&m, cli).plan(&["t".to_string()]).unwrap();
        assert_eq!(plan[0].environments.get("A").unwrap(), "cli");
    }

    #[test]
    fn transfer_task_materializes_tar_command() {
        let m = manifest(
            r#"
tasks:
  ship:
    transfer: "./pkg -> /tmp/out"
"#,
        );
        let plan = Planner::new(&m, HashMap::new())
            .plan(&["ship".to_string()])
            .unwrap();
        assert_eq!(plan[0].commands[0], "tar -C /tmp/out -xvzf - ");
        assert!(!plan[0].local);
        assert!(plan[0].transfer.is_some());
    }
}
