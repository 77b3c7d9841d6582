use crate::cli::TypesArgs;
use crate::commands::simulate;

use anyhow::Result;
use halbus::Schema;

fn describe(schema: &Schema) -> String {
  if schema.is_empty() {
    return "-".to_string();
  }
  schema
    .iter()
    .map(|(name, spec)| {
      let marker = if spec.required { "" } else { "?" };
      format!("{}{}: {}", name, marker, spec.kinds)
    })
    .collect::<Vec<_>>()
    .join(", ")
}

pub fn list(args: TypesArgs) -> Result<()> {
  let registry = simulate::registry()?;
  for name in registry.names() {
    match args.format.as_str() {
      "names" => println!("{}", name),
      _ => {
        if let Some(m_type) = registry.lookup(name) {
          let schema = m_type.schema();
          println!(
            "{:<14} data {{{}}}  response {{{}}}",
            name,
            describe(&schema.data),
            describe(&schema.response)
          );
        }
      }
    }
  }
  Ok(())
}
