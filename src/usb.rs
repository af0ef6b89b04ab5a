//! Implements USB devices and tasks for transporting HID [KeyboardReport]s and
//! [MediaKeyboardReport]s, plus a CDC serial port carrying log output.
//! Mostly lifted from [embassy_usb] examples.

use core::sync::atomic::{AtomicBool, Ordering};

use crate::UPDATES_CHANNEL;

use embassy_futures::join::join4;
use embassy_rp::{
    peripherals::USB,
    usb::{Driver, InterruptHandler},
    bind_interrupts,
};
use embassy_usb::{
    class::hid::{HidReaderWriter, HidWriter, ReportId, RequestHandler, State as HidState},
    class::cdc_acm::{CdcAcmClass, State as CdcState},
    control::OutResponse,
    Builder, Handler, UsbDevice,
};
use log::{debug, info, warn};
use usbd_hid::descriptor::{KeyboardReport, MediaKeyboardReport, SerializedDescriptor};

use static_cell::StaticCell;

type MyDriver = Driver<'static, USB>;
type MyUsbDevice = UsbDevice<'static, MyDriver>;
type MyHidReaderWriter = HidReaderWriter<'static, MyDriver, 1, 8>;
type MyHidWriter = HidWriter<'static, MyDriver, 8>;
type MyCdcAcmClass = CdcAcmClass<'static, MyDriver>;

bind_interrupts!(pub(crate) struct Irqs {
    USBCTRL_IRQ => InterruptHandler<USB>;
});

pub struct Classes {
    pub keyboard: MyHidReaderWriter,
    pub media: MyHidWriter,
    pub serial: MyCdcAcmClass,
}

pub fn get_device(driver: MyDriver) -> (MyUsbDevice, Classes) {
    let mut config = embassy_usb::Config::new(0xfeed, 0x1307);
    config.manufacturer = Some("ErgoSplit");
    config.product = Some("ErgoSplit 76");
    config.serial_number = Some("001");
    config.max_power = 100;
    config.max_packet_size_0 = 64;

    static DEVICE_HANDLER: StaticCell<MyDeviceHandler> = StaticCell::new();

    // Create embassy-usb DeviceBuilder using the driver and config.
    static CONFIG_DESC: StaticCell<[u8; 256]> = StaticCell::new();
    static BOS_DESC: StaticCell<[u8; 256]> = StaticCell::new();
    static CONTROL_BUF: StaticCell<[u8; 128]> = StaticCell::new();
    let mut builder = Builder::new(
        driver,
        config,
        &mut CONFIG_DESC.init([0; 256])[..],
        &mut BOS_DESC.init([0; 256])[..],
        &mut [], // no msos descriptors
        &mut CONTROL_BUF.init([0; 128])[..],
    );

    builder.handler(DEVICE_HANDLER.init(MyDeviceHandler::new()));

    let keyboard = {
        static STATE: StaticCell<HidState> = StaticCell::new();
        let config = embassy_usb::class::hid::Config {
            report_descriptor: KeyboardReport::desc(),
            request_handler: None,
            poll_ms: 1,
            max_packet_size: 8,
        };
        HidReaderWriter::<_, 1, 8>::new(&mut builder, STATE.init(HidState::new()), config)
    };

    let media = {
        static STATE: StaticCell<HidState> = StaticCell::new();
        let config = embassy_usb::class::hid::Config {
            report_descriptor: MediaKeyboardReport::desc(),
            request_handler: None,
            poll_ms: 10,
            max_packet_size: 8,
        };
        HidWriter::<_, 8>::new(&mut builder, STATE.init(HidState::new()), config)
    };

    let serial = {
        static STATE: StaticCell<CdcState> = StaticCell::new();
        let state = STATE.init(CdcState::new());
        CdcAcmClass::new(&mut builder, state, 64)
    };

    (builder.build(), Classes { keyboard, media, serial })
}

#[embassy_executor::task]
pub async fn run(mut usb: MyUsbDevice, classes: Classes)
{
    let Classes { keyboard, mut media, serial } = classes;

    // Run the USB device.
    let usb_fut = usb.run();

    let (reader, mut writer) = keyboard.split();

    let in_fut = async {
        let mut last_report = KeyboardReport::default();
        let mut last_media = 0u16;
        loop {
            let (report, media_usage) = UPDATES_CHANNEL.receive().await;
            if report != last_report {
                if let Err(e) = writer.write_serialize(&report).await {
                    warn!("Failed to send keyboard report: {:?}", e);
                }
                last_report = report;
            }
            if media_usage != last_media {
                if let Err(e) = media.write_serialize(&MediaKeyboardReport { usage_id: media_usage }).await {
                    warn!("Failed to send media report: {:?}", e);
                }
                last_media = media_usage;
            }
        }
    };

    let out_fut = async {
        static REQUEST_HANDLER: StaticCell<MyRequestHandler> = StaticCell::new();
        reader.run(false, REQUEST_HANDLER.init(MyRequestHandler {})).await;
    };

    // 1024 byte log buffer
    let log_fut = embassy_usb_logger::with_class!(1024, log::LevelFilter::Info, serial);

    // Run everything concurrently.
    join4(usb_fut, in_fut, out_fut, log_fut).await;
}

struct MyRequestHandler;

impl RequestHandler for MyRequestHandler {
    fn get_report(&mut self, id: ReportId, _buf: &mut [u8]) -> Option<usize> {
        debug!("Get report for {:?}", id);
        None
    }

    fn set_report(&mut self, id: ReportId, data: &[u8]) -> OutResponse {
        // Host lock-key LEDs; this board has nowhere to show them.
        debug!("Set report for {:?}: {:?}", id, data);
        OutResponse::Accepted
    }

    fn set_idle_ms(&mut self, id: Option<ReportId>, dur: u32) {
        debug!("Set idle rate for {:?} to {:?}", id, dur);
    }

    fn get_idle_ms(&mut self, id: Option<ReportId>) -> Option<u32> {
        debug!("Get idle rate for {:?}", id);
        None
    }
}

struct MyDeviceHandler {
    configured: AtomicBool,
}

impl MyDeviceHandler {
    fn new() -> Self {
        MyDeviceHandler {
            configured: AtomicBool::new(false),
        }
    }
}

impl Handler for MyDeviceHandler {
    fn enabled(&mut self, enabled: bool) {
        self.configured.store(false, Ordering::Relaxed);
        if enabled {
            info!("Device enabled");
        } else {
            info!("Device disabled");
        }
    }

    fn reset(&mut self) {
        self.configured.store(false, Ordering::Relaxed);
        info!("Bus reset, the Vbus current limit is 100mA");
    }

    fn addressed(&mut self, addr: u8) {
        self.configured.store(false, Ordering::Relaxed);
        info!("USB address set to: {}", addr);
    }

    fn configured(&mut self, configured: bool) {
        self.configured.store(configured, Ordering::Relaxed);
        if configured {
            info!("Device configured, it may now draw up to the configured current limit from Vbus.")
        } else {
            info!("Device is no longer configured, the Vbus current limit is 100mA.");
        }
    }
}
