// 构建脚本: 启用 ffmpeg 特性时链接FFmpeg依赖库
fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    if std::env::var_os("CARGO_FEATURE_FFMPEG").is_none() {
        return;
    }

    // 仅在Windows MSVC环境下添加FFmpeg相关库
    let target_os = std::env::var("CARGO_CFG_TARGET_OS").unwrap_or_default();
    let target_env = std::env::var("CARGO_CFG_TARGET_ENV").unwrap_or_default();
    if target_os == "windows" && target_env == "msvc" {
        // Intel QSV 硬件解码
        println!("cargo:rustc-link-lib=dylib=libmfx");

        // OLE 自动化和VFW (dshow 摄像头)
        println!("cargo:rustc-link-lib=dylib=oleaut32");
        println!("cargo:rustc-link-lib=dylib=vfw32");

        println!("cargo:rustc-link-lib=dylib=secur32");
    }
}
