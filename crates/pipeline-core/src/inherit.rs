//! Parent-to-child inheritance during setup.

use std::collections::HashMap;

/// Fields a parent node passes down to its children during setup.
///
/// A child adopts a field only when it has not set its own; environment
/// maps are unioned with child keys winning on conflict.
#[derive(Debug, Clone, Default)]
pub struct Inherited {
    pub workdir: String,
    pub image: String,
    pub environment: HashMap<String, String>,
    pub timeout: u64,
    pub image_registry: String,
    pub image_registry_username: String,
    pub image_registry_password: String,
}

/// Union `parent` into `child`, keeping child values on conflict.
pub(crate) fn merge_env(child: &mut HashMap<String, String>, parent: &HashMap<String, String>) {
    for (key, value) in parent {
        child
            .entry(key.clone())
            .or_insert_with(|| value.clone());
    }
}

pub(crate) fn merge_str(child: &mut String, parent: &str) {
    if child.is_empty() {
        *child = parent.to_string();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn child_keys_win_on_conflict() {
        let mut child = HashMap::from([("A".to_string(), "child".to_string())]);
        let parent = HashMap::from([
            ("A".to_string(), "parent".to_string()),
            ("B".to_string(), "parent".to_string()),
        ]);

        merge_env(&mut child, &parent);
        assert_eq!(child["A"], "child");
        assert_eq!(child["B"], "parent");
    }
}
