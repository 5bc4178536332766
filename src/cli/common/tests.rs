// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::str::FromStr;

use super::{printers::tree_lines, *};

#[test]
fn arg_file_types_come_from_extensions() {
    assert!(matches!(ArgFileTypes::from_str("toml"), Ok(ArgFileTypes::Toml)));
    assert!(matches!(ArgFileTypes::from_str("json"), Ok(ArgFileTypes::Json)));
    assert!(ArgFileTypes::from_str("yaml").is_err());
    assert_eq!(ARG_FILE_TYPES_COMMA_SEPARATED.as_str(), "toml, json");
    assert!(ARG_FILE_HELP.ends_with("toml, json"));
}

#[test]
fn summary_lines_form_a_tree() {
    let lines = tree_lines(&["2 archive(s)", "Template: J1234+5678", "Writing ipta TOAs to stdout"]);
    assert_eq!(
        lines,
        vec![
            "├ 2 archive(s)",
            "├ Template: J1234+5678",
            "└ Writing ipta TOAs to stdout",
        ]
    );
    assert!(tree_lines::<&str>(&[]).is_empty());
}

