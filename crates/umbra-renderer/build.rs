use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

fn main() {
    let dest = env::var("OUT_DIR").expect("OUT_DIR is set by cargo");

    // ========================================================================
    // SPIR-V Shader Compilation (via glslc from Vulkan SDK)
    // ========================================================================
    // The renderer loads .spv files at runtime from UMBRA_SPIRV_DIR, so a
    // missing glslc only warns here; the renderer reports the missing binary.
    let spirv_dir = Path::new(&dest).join("spirv");
    fs::create_dir_all(&spirv_dir).expect("create spirv output dir");
    println!("cargo:rustc-env=UMBRA_SPIRV_DIR={}", spirv_dir.display());
    println!("cargo:rerun-if-changed=shaders");

    let shader_dir = Path::new("shaders");
    if !shader_dir.exists() {
        return;
    }

    let glslc = match find_glslc() {
        Some(path) => path,
        None => {
            println!(
                "cargo:warning=glslc not found; shaders were not compiled. \
                 Install the Vulkan SDK or put glslc on PATH."
            );
            return;
        }
    };

    let mut sources: Vec<PathBuf> = match fs::read_dir(shader_dir) {
        Ok(entries) => entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().map(|ext| ext == "glsl").unwrap_or(false))
            .collect(),
        Err(e) => {
            println!("cargo:warning=can't list shaders/: {e}");
            return;
        }
    };
    sources.sort();

    for src_path in &sources {
        let Some(filename) = src_path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        // Stage comes from the name: <name>.<vert|frag>.glsl
        let stage = if filename.contains(".vert.") {
            "vertex"
        } else if filename.contains(".frag.") {
            "fragment"
        } else {
            println!("cargo:warning=skipping {filename}: no stage in name");
            continue;
        };
        let spv_path = spirv_dir.join(filename.replace(".glsl", ".spv"));
        compile_shader(&glslc, src_path, &spv_path, stage, filename);
        println!("cargo:rerun-if-changed=shaders/{filename}");
    }
}

/// Compile a single shader file to SPIR-V.
fn compile_shader(glslc: &Path, src_path: &Path, spv_path: &Path, stage: &str, filename: &str) -> bool {
    let output = Command::new(glslc)
        .arg(format!("-fshader-stage={stage}"))
        .args(["--target-env=vulkan1.3", "--target-spv=spv1.6", "-O", "-o"])
        .arg(spv_path)
        .arg(src_path)
        .output();

    match output {
        Ok(result) => {
            let stderr = String::from_utf8_lossy(&result.stderr);
            if result.status.success() {
                if !stderr.is_empty() {
                    println!("cargo:warning=glslc {filename}: {stderr}");
                }
                true
            } else {
                println!("cargo:warning=glslc FAILED {filename}: {stderr}");
                false
            }
        }
        Err(e) => {
            println!("cargo:warning=glslc: failed to run for {filename}: {e}");
            false
        }
    }
}

/// Find glslc binary: check PATH, then VULKAN_SDK.
fn find_glslc() -> Option<PathBuf> {
    if let Ok(output) = Command::new("glslc").arg("--version").output() {
        if output.status.success() {
            return Some(PathBuf::from("glslc"));
        }
    }

    if let Ok(sdk) = env::var("VULKAN_SDK") {
        for candidate in [
            PathBuf::from(&sdk).join("bin").join("glslc"),
            PathBuf::from(&sdk).join("Bin").join("glslc.exe"),
        ] {
            if candidate.exists() {
                return Some(candidate);
            }
        }
    }

    None
}
