use cairn_lib::keys::{display_name, encode_path, standardize};

use crate::output::print_stat;

/// Print the key `name` is stored under. With `file`, `name` is a path or URL.
pub fn cmd_key(name: &str, file: bool) {
  let key = if file { encode_path(name) } else { standardize(name) };
  print_stat("Key", &key);
  print_stat("Display", &display_name(&key));
}
