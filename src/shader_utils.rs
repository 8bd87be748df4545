use anyhow::{anyhow, bail};

// WGSL sources embedded at build time, fetched by name when the
// pipelines are constructed.
#[derive(rust_embed::RustEmbed)]
#[folder = "shaders/"]
pub struct Shaders;

/// Builds a shader module from an embedded source. Validation runs
/// inside an error scope so a broken shader reports its diagnostic
/// instead of tripping the uncaptured-error handler.
pub fn create_shader_module(
    device: &wgpu::Device,
    name: &str,
) -> anyhow::Result<wgpu::ShaderModule> {
    let file = Shaders::get(name).ok_or_else(|| anyhow!("shader {:?} is not embedded", name))?;
    let source = String::from_utf8(file.data.into_owned())?;
    device.push_error_scope(wgpu::ErrorFilter::Validation);
    let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(name),
        source: wgpu::ShaderSource::Wgsl(source.into()),
    });
    if let Some(error) = futures::executor::block_on(device.pop_error_scope()) {
        bail!("shader {:?} failed validation: {}", name, error);
    }
    Ok(module)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_shaders_are_embedded() {
        for name in [
            "emit.wgsl",
            "update.wgsl",
            "scan_local.wgsl",
            "scan_offsets.wgsl",
            "scan_apply.wgsl",
            "compact.wgsl",
            "draw.wgsl",
        ] {
            assert!(Shaders::get(name).is_some(), "missing shader {}", name);
        }
    }

    #[test]
    fn shaders_are_utf8() {
        for entry in Shaders::iter() {
            let file = Shaders::get(&entry).unwrap();
            assert!(
                std::str::from_utf8(&file.data).is_ok(),
                "{} is not valid utf-8",
                entry
            );
        }
    }
}
