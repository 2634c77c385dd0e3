use serde::{Deserialize, Serialize};

use super::instance::{is_same_or_descendant, normalize_group_path, Instance, DEFAULT_GROUP};
use crate::error::{DeckError, Result};

/// A node in the group hierarchy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    pub name: String,
    pub path: String,
    pub expanded: bool,
    pub order: i32,
}

impl Group {
    fn new(path: &str, order: i32) -> Self {
        Self {
            name: last_segment(path).to_string(),
            path: path.to_string(),
            expanded: true,
            order,
        }
    }

    pub fn parent(&self) -> Option<&str> {
        parent_path(&self.path)
    }
}

/// Group index derived from instances plus persisted group metadata.
///
/// `groups` is kept in insertion order, which is also the tie-breaker for siblings
/// sharing an `order`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupTree {
    groups: Vec<Group>,
}

impl GroupTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from persisted groups, synthesizing any path an instance references
    pub fn build(instances: &[Instance], persisted: Vec<Group>) -> Self {
        let mut tree = Self::new();
        for group in persisted {
            let path = normalize_group_path(&group.path);
            if path.is_empty() || tree.contains(&path) {
                continue;
            }
            tree.groups.push(Group {
                name: last_segment(&path).to_string(),
                path,
                ..group
            });
        }
        // A renamed group can be persisted ahead of its parent
        let persisted_paths: Vec<String> = tree.groups.iter().map(|g| g.path.clone()).collect();
        for path in &persisted_paths {
            tree.create_group(path);
        }
        for inst in instances {
            tree.create_group(&inst.group_path);
        }
        tree
    }

    /// All groups in insertion order
    pub fn groups(&self) -> &[Group] {
        &self.groups
    }

    pub fn get(&self, path: &str) -> Option<&Group> {
        self.groups.iter().find(|g| g.path == path)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.get(path).is_some()
    }

    /// Create `path` and any missing ancestors; existing groups are left untouched
    pub fn create_group(&mut self, path: &str) -> Option<&Group> {
        let path = normalize_group_path(path);
        if path.is_empty() {
            return None;
        }

        let mut current = String::new();
        for segment in path.split('/') {
            if !current.is_empty() {
                current.push('/');
            }
            current.push_str(segment);
            if !self.contains(&current) {
                let order = self.next_order(parent_path(&current));
                self.groups.push(Group::new(&current, order));
            }
        }
        self.get(&path)
    }

    /// Direct children of `parent` (`None` for top level), in display order
    pub fn children(&self, parent: Option<&str>) -> Vec<&Group> {
        let mut children: Vec<(usize, &Group)> = self
            .groups
            .iter()
            .enumerate()
            .filter(|(_, g)| g.parent() == parent)
            .collect();
        children.sort_by_key(|(idx, g)| (g.order, *idx));
        children.into_iter().map(|(_, g)| g).collect()
    }

    pub fn roots(&self) -> Vec<&Group> {
        self.children(None)
    }

    /// Reassign one instance, creating the target group when needed
    pub fn move_instance(
        &mut self,
        instances: &mut [Instance],
        id: &str,
        new_group_path: &str,
    ) -> Result<()> {
        let mut target = normalize_group_path(new_group_path);
        if target.is_empty() {
            target = DEFAULT_GROUP.to_string();
        }

        let inst = instances
            .iter_mut()
            .find(|i| i.id == id)
            .ok_or_else(|| DeckError::InstanceNotFound(id.to_string()))?;

        self.create_group(&target);
        inst.group_path = target;
        Ok(())
    }

    /// Rewrite `old` and everything under it to live under `new`
    pub fn rename_group(&mut self, instances: &mut [Instance], old: &str, new: &str) -> Result<()> {
        let old = normalize_group_path(old);
        let new = normalize_group_path(new);
        if old == new {
            return Ok(());
        }
        if !self.contains(&old) {
            return Err(DeckError::GroupNotFound(old));
        }
        if new.is_empty() || is_same_or_descendant(&new, &old) {
            return Err(DeckError::InvalidGroupPath(new));
        }
        if self.contains(&new) {
            return Err(DeckError::GroupExists(new));
        }

        if let Some(parent) = parent_path(&new) {
            self.create_group(parent);
        }

        for group in &mut self.groups {
            if let Some(path) = rebase(&group.path, &old, &new) {
                group.path = path;
                group.name = last_segment(&group.path).to_string();
            }
        }
        for inst in instances.iter_mut() {
            if let Some(path) = rebase(&inst.group_path, &old, &new) {
                inst.group_path = path;
            }
        }
        Ok(())
    }

    /// Delete an empty group and its (empty) descendants
    pub fn delete_group(&mut self, instances: &[Instance], path: &str) -> Result<()> {
        let path = normalize_group_path(path);
        if !self.contains(&path) {
            return Err(DeckError::GroupNotFound(path));
        }
        if instances.iter().any(|i| i.in_group(&path)) {
            return Err(DeckError::NotEmpty(path));
        }
        self.groups.retain(|g| !is_same_or_descendant(&g.path, &path));
        Ok(())
    }

    /// Delete a group together with every instance under it.
    ///
    /// Returns the removed instances so their sessions can be killed.
    pub fn delete_group_cascade(
        &mut self,
        instances: &mut Vec<Instance>,
        path: &str,
    ) -> Result<Vec<Instance>> {
        let path = normalize_group_path(path);
        if !self.contains(&path) {
            return Err(DeckError::GroupNotFound(path));
        }

        let (removed, kept): (Vec<Instance>, Vec<Instance>) =
            instances.drain(..).partition(|i| i.in_group(&path));
        *instances = kept;
        self.groups.retain(|g| !is_same_or_descendant(&g.path, &path));
        Ok(removed)
    }

    /// Move a group `delta` places among its siblings
    pub fn reorder(&mut self, path: &str, delta: i32) -> Result<()> {
        let path = normalize_group_path(path);
        let group = self
            .get(&path)
            .ok_or_else(|| DeckError::GroupNotFound(path.clone()))?;
        let parent = group.parent().map(str::to_string);

        let mut siblings: Vec<String> = self
            .children(parent.as_deref())
            .into_iter()
            .map(|g| g.path.clone())
            .collect();
        let Some(from) = siblings.iter().position(|p| *p == path) else {
            return Ok(());
        };
        let last = siblings.len() as i64 - 1;
        let to = (from as i64 + delta as i64).clamp(0, last) as usize;
        let moved = siblings.remove(from);
        siblings.insert(to, moved);

        for (order, sibling) in siblings.iter().enumerate() {
            if let Some(g) = self.groups.iter_mut().find(|g| g.path == *sibling) {
                g.order = order as i32;
            }
        }
        Ok(())
    }

    pub fn is_expanded(&self, path: &str) -> bool {
        self.get(path).map(|g| g.expanded).unwrap_or(true)
    }

    pub fn set_expanded(&mut self, path: &str, expanded: bool) {
        if let Some(g) = self.groups.iter_mut().find(|g| g.path == path) {
            g.expanded = expanded;
        }
    }

    pub fn toggle_expanded(&mut self, path: &str) {
        let expanded = self.is_expanded(path);
        self.set_expanded(path, !expanded);
    }

    /// Instances in `path` or any descendant
    pub fn instance_count(&self, instances: &[Instance], path: &str) -> usize {
        instances.iter().filter(|i| i.in_group(path)).count()
    }

    fn next_order(&self, parent: Option<&str>) -> i32 {
        self.groups
            .iter()
            .filter(|g| g.parent() == parent)
            .map(|g| g.order + 1)
            .max()
            .unwrap_or(0)
    }
}

fn parent_path(path: &str) -> Option<&str> {
    path.rsplit_once('/').map(|(parent, _)| parent)
}

fn last_segment(path: &str) -> &str {
    path.rsplit_once('/').map(|(_, name)| name).unwrap_or(path)
}

fn rebase(path: &str, old: &str, new: &str) -> Option<String> {
    is_same_or_descendant(path, old).then(|| format!("{}{}", new, &path[old.len()..]))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inst(title: &str, group: &str) -> Instance {
        Instance::new(title, format!("/tmp/{}", title)).with_group(group)
    }

    fn paths(tree: &GroupTree) -> Vec<&str> {
        tree.groups().iter().map(|g| g.path.as_str()).collect()
    }

    fn assert_no_orphans(tree: &GroupTree, instances: &[Instance]) {
        for i in instances {
            assert!(tree.contains(&i.group_path), "orphaned: {}", i.group_path);
        }
        for g in tree.groups() {
            if let Some(parent) = g.parent() {
                assert!(tree.contains(parent), "missing parent of {}", g.path);
            }
        }
    }

    #[test]
    fn test_create_group_synthesizes_ancestors() {
        let mut tree = GroupTree::new();
        tree.create_group("a/b/c");
        assert_eq!(paths(&tree), vec!["a", "a/b", "a/b/c"]);
        for g in tree.groups() {
            assert!(g.expanded);
            assert_eq!(g.order, 0);
        }
        assert_eq!(tree.get("a/b/c").unwrap().name, "c");

        let before = tree.clone();
        tree.create_group("a/b/c");
        tree.create_group("/a/b/");
        assert_eq!(tree, before);
    }

    #[test]
    fn test_new_siblings_go_last() {
        let mut tree = GroupTree::new();
        tree.create_group("work");
        tree.create_group("personal");
        tree.create_group("work/api");
        assert_eq!(tree.get("personal").unwrap().order, 1);
        assert_eq!(tree.get("work/api").unwrap().order, 0);
    }

    #[test]
    fn test_build_synthesizes_missing_groups() {
        let instances = vec![inst("api", "work/backend"), inst("blog", "personal")];
        let persisted = vec![Group {
            name: "empty".into(),
            path: "empty".into(),
            expanded: false,
            order: 5,
        }];

        let tree = GroupTree::build(&instances, persisted);
        assert_eq!(paths(&tree), vec!["empty", "work", "work/backend", "personal"]);
        assert!(!tree.is_expanded("empty"));
        assert_eq!(tree.get("empty").unwrap().order, 5);
        assert_no_orphans(&tree, &instances);
    }

    #[test]
    fn test_build_keeps_parent_listed_after_child() {
        let persisted = vec![
            Group { name: "a".into(), path: "z/a".into(), expanded: true, order: 0 },
            Group { name: "z".into(), path: "z".into(), expanded: false, order: 3 },
        ];
        let tree = GroupTree::build(&[], persisted);
        assert_eq!(paths(&tree), vec!["z/a", "z"]);
        assert!(!tree.is_expanded("z"));
        assert_eq!(tree.get("z").unwrap().order, 3);
    }

    #[test]
    fn test_move_instance_creates_target() {
        let mut instances = vec![inst("api", "work")];
        let mut tree = GroupTree::build(&instances, Vec::new());
        let id = instances[0].id.clone();

        tree.move_instance(&mut instances, &id, "clients/acme").unwrap();
        assert_eq!(instances[0].group_path, "clients/acme");
        assert!(tree.contains("clients"));

        tree.move_instance(&mut instances, &id, "").unwrap();
        assert_eq!(instances[0].group_path, DEFAULT_GROUP);
        assert_no_orphans(&tree, &instances);

        assert!(matches!(
            tree.move_instance(&mut instances, "nope", "x"),
            Err(DeckError::InstanceNotFound(_))
        ));
    }

    #[test]
    fn test_rename_group_rewrites_descendants() {
        let mut instances = vec![
            inst("a", "work"),
            inst("b", "work/api"),
            inst("c", "workshop"),
            inst("d", "personal"),
        ];
        let mut tree = GroupTree::build(&instances, Vec::new());
        tree.create_group("work/api/v2");

        tree.rename_group(&mut instances, "work", "jobs").unwrap();

        let groups: Vec<&str> = instances.iter().map(|i| i.group_path.as_str()).collect();
        assert_eq!(groups, vec!["jobs", "jobs/api", "workshop", "personal"]);
        assert!(tree.contains("jobs/api/v2"));
        assert!(!tree.contains("work"));
        assert!(!tree.contains("work/api"));
        assert_eq!(tree.get("jobs").unwrap().name, "jobs");
        assert_no_orphans(&tree, &instances);
    }

    #[test]
    fn test_rename_group_into_new_parent() {
        let mut instances = vec![inst("a", "work")];
        let mut tree = GroupTree::build(&instances, Vec::new());

        tree.rename_group(&mut instances, "work", "archive/2024").unwrap();
        assert_eq!(instances[0].group_path, "archive/2024");
        assert_eq!(tree.get("archive/2024").unwrap().name, "2024");
        assert_no_orphans(&tree, &instances);
    }

    #[test]
    fn test_rename_group_rejects_bad_targets() {
        let mut instances = vec![inst("a", "work"), inst("b", "personal")];
        let mut tree = GroupTree::build(&instances, Vec::new());

        assert!(matches!(
            tree.rename_group(&mut instances, "work", "personal"),
            Err(DeckError::GroupExists(_))
        ));
        assert!(matches!(
            tree.rename_group(&mut instances, "work", "work/inner"),
            Err(DeckError::InvalidGroupPath(_))
        ));
        assert!(matches!(
            tree.rename_group(&mut instances, "missing", "x"),
            Err(DeckError::GroupNotFound(_))
        ));
    }

    #[test]
    fn test_delete_group_blocks_when_not_empty() {
        let instances = vec![inst("a", "work/api")];
        let mut tree = GroupTree::build(&instances, Vec::new());
        tree.create_group("empty/child");

        assert!(matches!(
            tree.delete_group(&instances, "work"),
            Err(DeckError::NotEmpty(_))
        ));
        assert!(tree.contains("work"));

        tree.delete_group(&instances, "empty").unwrap();
        assert!(!tree.contains("empty"));
        assert!(!tree.contains("empty/child"));
        assert_no_orphans(&tree, &instances);
    }

    #[test]
    fn test_delete_group_cascade() {
        let mut instances = vec![inst("a", "work"), inst("b", "work/api"), inst("c", "home")];
        let mut tree = GroupTree::build(&instances, Vec::new());

        let removed = tree.delete_group_cascade(&mut instances, "work").unwrap();
        assert_eq!(removed.len(), 2);
        assert_eq!(instances.len(), 1);
        assert_eq!(instances[0].title, "c");
        assert!(!tree.contains("work/api"));
        assert_no_orphans(&tree, &instances);
    }

    #[test]
    fn test_reorder_siblings() {
        let mut tree = GroupTree::new();
        for p in ["a", "b", "c", "a/x"] {
            tree.create_group(p);
        }

        tree.reorder("c", -1).unwrap();
        let order: Vec<&str> = tree.roots().iter().map(|g| g.path.as_str()).collect();
        assert_eq!(order, vec!["a", "c", "b"]);

        tree.reorder("a", 10).unwrap();
        let order: Vec<&str> = tree.roots().iter().map(|g| g.path.as_str()).collect();
        assert_eq!(order, vec!["c", "b", "a"]);
        assert_eq!(tree.get("a/x").unwrap().order, 0);
    }

    #[test]
    fn test_ties_break_by_insertion() {
        let persisted = vec![
            Group { name: "z".into(), path: "z".into(), expanded: true, order: 0 },
            Group { name: "y".into(), path: "y".into(), expanded: true, order: 0 },
        ];
        let tree = GroupTree::build(&[], persisted);
        let order: Vec<&str> = tree.roots().iter().map(|g| g.path.as_str()).collect();
        assert_eq!(order, vec!["z", "y"]);
    }

    #[test]
    fn test_mutation_sequence_never_orphans() {
        let mut instances = vec![inst("a", "w"), inst("b", "w/x"), inst("c", "p")];
        let mut tree = GroupTree::build(&instances, Vec::new());
        let b = instances[1].id.clone();

        tree.move_instance(&mut instances, &b, "q/r").unwrap();
        assert_no_orphans(&tree, &instances);
        tree.rename_group(&mut instances, "q", "w/q").unwrap();
        assert_no_orphans(&tree, &instances);
        tree.delete_group(&instances, "w/x").unwrap();
        assert_no_orphans(&tree, &instances);
        let _ = tree.delete_group(&instances, "w");
        assert_no_orphans(&tree, &instances);
        tree.delete_group_cascade(&mut instances, "w").unwrap();
        assert_no_orphans(&tree, &instances);

        let rebuilt = GroupTree::build(&instances, tree.groups().to_vec());
        assert_eq!(rebuilt, tree);
    }
}
