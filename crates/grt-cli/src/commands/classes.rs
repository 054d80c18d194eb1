//! `grt classes`: list the loaded metaclasses.

use super::Setup;

pub fn execute(setup: &Setup, pattern: Option<&str>, members: bool) -> anyhow::Result<()> {
    let grt = setup.context()?;
    let pattern = pattern.map(glob::Pattern::new).transpose()?;

    let mut shown = 0;
    for class in grt.get_metaclasses() {
        if let Some(pattern) = &pattern {
            if !pattern.matches(class.name()) {
                continue;
            }
        }
        let parent = class.parent().map(|p| p.name().to_string()).unwrap_or_default();
        let mut member_count = 0;
        class.foreach_member(|_| {
            member_count += 1;
            true
        });
        println!(
            "{:<40} {:<30} {:>3} members  0x{:08x}{}",
            class.name(),
            parent,
            member_count,
            class.crc32(),
            if class.is_abstract() { "  (abstract)" } else { "" }
        );

        if members {
            class.foreach_member(|member| {
                let mut flags = Vec::new();
                if member.owned {
                    flags.push("owned");
                }
                if member.read_only {
                    flags.push("read-only");
                }
                if member.calculated {
                    flags.push("calculated");
                }
                if member.allow_null {
                    flags.push("allow-null");
                }
                println!("    {:<30} {}  {}", member.name, member.type_spec, flags.join(" "));
                true
            });
        }
        shown += 1;
    }

    if shown == 0 {
        eprintln!("No classes loaded; pass --structs <dir> or a config with struct_paths");
    }
    Ok(())
}
