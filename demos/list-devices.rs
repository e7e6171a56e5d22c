use droid_adb::{DeviceError, Host, UnixPath};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), DeviceError> {
    env_logger::init();

    let host = Host::from_env()?;
    println!("adb server protocol version {}", host.version().await?);

    let devices = host.devices().await?;
    println!("{}", devices);

    let device = host.device_or_default(Option::<&String>::None).await?;
    println!("Selected device: {}", device);

    let output = device
        .shell_command_output("getprop ro.build.fingerprint")
        .await?;
    println!("Fingerprint: {}", output.trim());

    for entry in device.list_dir(UnixPath::new("/sdcard")).await? {
        println!("{:o}\t{}\t{}", entry.stat.mode, entry.stat.size, entry.name);
    }

    Ok(())
}
