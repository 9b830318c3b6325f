//! Prints the CRD manifests owned by this provider as a multi-document YAML stream.
//!
//! `cargo run -p crds --bin crdgen > config/crd/bases/crds.yaml`

fn main() -> anyhow::Result<()> {
    for crd in crds::provider_crds() {
        print!("---\n{}", serde_yaml::to_string(&crd)?);
    }
    Ok(())
}
