/// Recursively merge `overlay` into `base`.
///
/// Tables merge per key; scalars and arrays from the overlay replace the
/// base value.
pub fn deep_merge(base: &mut toml::Value, overlay: &toml::Value) {
    match (base, overlay) {
        (toml::Value::Table(base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_val) in overlay_table {
                if let Some(base_val) = base_table.get_mut(key) {
                    deep_merge(base_val, overlay_val);
                } else {
                    base_table.insert(key.clone(), overlay_val.clone());
                }
            }
        },
        (base, overlay) => {
            *base = overlay.clone();
        },
    }
}

/// Set a dotted `path` in `root`, creating intermediate tables. A non-table
/// value in the way is replaced.
pub fn set_path(root: &mut toml::Value, path: &str, value: toml::Value) {
    let mut current = root;
    let mut segments = path.split('.').peekable();
    while let Some(segment) = segments.next() {
        if !current.is_table() {
            *current = toml::Value::Table(toml::Table::new());
        }
        let toml::Value::Table(table) = current else {
            return;
        };
        if segments.peek().is_none() {
            table.insert(segment.to_owned(), value);
            return;
        }
        current = table
            .entry(segment.to_owned())
            .or_insert_with(|| toml::Value::Table(toml::Table::new()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(s: &str) -> toml::Value {
        toml::from_str(s).unwrap()
    }

    #[test]
    fn tables_merge_and_scalars_replace() {
        let mut base = parse(
            r#"
            [build]
            max_parallel = 4
            [build.toolchain]
            program = "kilnc"
            args = ["a", "b"]
            "#,
        );
        let overlay = parse(
            r#"
            [build.toolchain]
            args = ["c"]
            "#,
        );
        deep_merge(&mut base, &overlay);

        assert_eq!(base["build"]["max_parallel"].as_integer(), Some(4));
        assert_eq!(base["build"]["toolchain"]["program"].as_str(), Some("kilnc"));
        let args = base["build"]["toolchain"]["args"].as_array().unwrap();
        assert_eq!(args.len(), 1);
    }

    #[test]
    fn new_keys_are_added() {
        let mut base = parse("[logging]\nlevel = \"info\"\n");
        deep_merge(&mut base, &parse("[watch]\nenabled = true\n"));
        assert_eq!(base["watch"]["enabled"].as_bool(), Some(true));
        assert_eq!(base["logging"]["level"].as_str(), Some("info"));
    }

    #[test]
    fn set_path_creates_tables() {
        let mut root = parse("[logging]\nlevel = \"info\"\n");
        set_path(&mut root, "build.root", toml::Value::String("/tmp/b".into()));
        set_path(&mut root, "logging.level", toml::Value::String("debug".into()));
        assert_eq!(root["build"]["root"].as_str(), Some("/tmp/b"));
        assert_eq!(root["logging"]["level"].as_str(), Some("debug"));
    }
}
