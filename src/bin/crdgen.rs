//! Prints the Klusterlet CustomResourceDefinition as YAML.
//!
//! ```bash
//! cargo run --bin crdgen > config/crd/klusterlet.yaml
//! ```

use kube::CustomResourceExt;
use klusterlet_operator::crd::Klusterlet;

fn main() -> anyhow::Result<()> {
    print!("{}", serde_yaml::to_string(&Klusterlet::crd())?);
    Ok(())
}
