//! The USB device: event task and request dispatch
//!
//! [`Device`] owns the event queue, the control pipe, and the tables that
//! map interfaces and endpoints to class drivers. The application calls
//! [`Device::task`] (or [`Device::poll`]) from one execution context.

use crate::{
    class::{dir_index, Class, ControlReply, Context, NO_DRIVER},
    control::{ControlPipe, Owner, Step},
    dcd::{Dcd, Speed},
    descriptor::{
        descriptor_type, kind, ConfigAttributes, ConfigurationDescriptor, DescriptorIter,
        Descriptors, InterfaceDescriptor,
    },
    event::{Completion, Event, EventQueue, IsrQueue, DEFAULT_QUEUE_SIZE},
    request::{feature, standard, Recipient, Request, RequestType},
    Error, Result, MAX_ENDPOINTS, MAX_INTERFACES,
};
use usb_device::{endpoint::EndpointAddress, UsbDirection};

/// A USB device
///
/// `N` is the event queue depth.
///
/// The class driver slice handed to [`task`](Device::task) must have the
/// same length on every call.
pub struct Device<'a, const N: usize = DEFAULT_QUEUE_SIZE> {
    descriptors: Descriptors<'a>,
    events: EventQueue<N>,
    control: ControlPipe<'a>,
    speed: Speed,
    /// Set once the first SETUP arrives after a reset.
    connected: bool,
    addressed: bool,
    suspended: bool,
    configuration: u8,
    remote_wakeup_enabled: bool,
    /// SET_ADDRESS waiting on its STATUS stage.
    pending_address: Option<u8>,
    itf2drv: [u8; MAX_INTERFACES],
    ep2drv: [[u8; 2]; MAX_ENDPOINTS],
    busy: [[bool; 2]; MAX_ENDPOINTS],
    drivers: Option<usize>,
}

impl<'a, const N: usize> Device<'a, N> {
    /// Create a device that answers with `descriptors`
    pub fn new(descriptors: Descriptors<'a>) -> Self {
        Device {
            control: ControlPipe::new(descriptors.ep0_max_packet_size()),
            descriptors,
            events: EventQueue::new(),
            speed: Speed::default(),
            connected: false,
            addressed: false,
            suspended: false,
            configuration: 0,
            remote_wakeup_enabled: false,
            pending_address: None,
            itf2drv: [NO_DRIVER; MAX_INTERFACES],
            ep2drv: [[NO_DRIVER; 2]; MAX_ENDPOINTS],
            busy: [[false; 2]; MAX_ENDPOINTS],
            drivers: None,
        }
    }

    /// Queue an event for the next [`task`](Device::task) call
    pub fn post(&mut self, event: Event) -> Result<()> {
        self.events.push(event)
    }

    /// Indicates if any events are waiting
    pub fn has_events(&self) -> bool {
        !self.events.is_empty()
    }

    /// Move events from an interrupt queue, then run [`task`](Device::task)
    pub fn poll<const M: usize>(
        &mut self,
        dcd: &mut dyn Dcd,
        isr: &IsrQueue<M>,
        classes: &mut [&mut dyn Class],
    ) {
        isr.drain_into(&mut self.events);
        self.task(dcd, classes);
    }

    /// Handle the events that are queued right now
    ///
    /// Events posted while this runs, including deferred completions, wait
    /// for the next call.
    ///
    /// # Panics
    ///
    /// Panics if `classes` has a different length than it had on the first
    /// call, or if it has 255 or more drivers.
    pub fn task(&mut self, dcd: &mut dyn Dcd, classes: &mut [&mut dyn Class]) {
        self.register(classes);

        let mut budget = self.events.len();
        while budget > 0 {
            let Some(event) = self.events.pop() else {
                break;
            };
            budget -= 1;

            if let Event::Setup(_) = event {
                if self.events.has_setup() {
                    debug!("SKIPPING SUPERSEDED SETUP");
                    continue;
                }
                let before = self.events.len();
                self.events.purge_control_completions();
                budget = budget.saturating_sub(before - self.events.len());
            }
            self.handle(dcd, classes, event);
        }
    }

    /// A context for calling class driver APIs outside of [`task`](Device::task)
    ///
    /// Endpoints opened through this context aren't bound to any driver.
    pub fn context<'c>(&'c mut self, dcd: &'c mut dyn Dcd) -> Context<'c> {
        Context::new(
            dcd,
            &mut self.events,
            &mut self.busy,
            &mut self.ep2drv,
            NO_DRIVER,
        )
    }

    /// Ask the host to resume the bus
    ///
    /// Returns `false`, and does nothing, unless the bus is suspended and the
    /// host enabled remote wakeup on a configuration that supports it.
    pub fn remote_wakeup(&mut self, dcd: &mut dyn Dcd) -> bool {
        let supported = self.attributes().contains(ConfigAttributes::REMOTE_WAKEUP);
        if self.suspended && self.remote_wakeup_enabled && supported {
            debug!("REMOTE WAKEUP");
            dcd.remote_wakeup();
            true
        } else {
            false
        }
    }

    /// Indicates if the host sent a SETUP packet since the last reset
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn is_addressed(&self) -> bool {
        self.addressed
    }

    pub fn is_suspended(&self) -> bool {
        self.suspended
    }

    pub fn is_configured(&self) -> bool {
        self.configuration != 0
    }

    /// The selected `bConfigurationValue`, or 0
    pub fn configuration(&self) -> u8 {
        self.configuration
    }

    /// The speed reported by the last bus reset
    pub fn speed(&self) -> Speed {
        self.speed
    }

    /// Indicates if the host enabled remote wakeup
    pub fn remote_wakeup_enabled(&self) -> bool {
        self.remote_wakeup_enabled
    }

    fn register(&mut self, classes: &mut [&mut dyn Class]) {
        match self.drivers {
            Some(count) => assert_eq!(
                count,
                classes.len(),
                "class driver table changed size"
            ),
            None => {
                assert!(
                    classes.len() < NO_DRIVER as usize,
                    "too many class drivers"
                );
                for class in classes.iter_mut() {
                    debug!("INIT {}", class.name());
                    class.init();
                }
                self.drivers = Some(classes.len());
            }
        }
    }

    fn handle(&mut self, dcd: &mut dyn Dcd, classes: &mut [&mut dyn Class], event: Event) {
        match event {
            Event::BusReset(speed) => {
                debug!("BUS RESET");
                self.reset(dcd, classes);
                self.speed = speed;
            }
            Event::Unplugged => {
                debug!("UNPLUGGED");
                self.reset(dcd, classes);
            }
            Event::Suspend => {
                if self.connected {
                    debug!("SUSPEND");
                    self.suspended = true;
                }
            }
            Event::Resume => {
                if self.connected && self.suspended {
                    debug!("RESUME");
                    self.suspended = false;
                }
            }
            Event::Setup(setup) => self.on_setup(dcd, classes, &setup),
            Event::XferComplete(completion) if completion.ep.index() == 0 => {
                if completion.deferred {
                    warn!("DROPPING DEFERRED EP0 COMPLETION");
                } else {
                    self.on_control_complete(dcd, classes, completion);
                }
            }
            Event::XferComplete(completion) => self.on_xfer_complete(dcd, classes, completion),
        }
    }

    fn reset(&mut self, dcd: &mut dyn Dcd, classes: &mut [&mut dyn Class]) {
        self.deconfigure(dcd, classes);
        self.control.reset();
        self.control
            .set_max_packet_size(self.descriptors.ep0_max_packet_size());
        self.connected = false;
        self.addressed = false;
        self.suspended = false;
        self.remote_wakeup_enabled = false;
        self.pending_address = None;
    }

    fn deconfigure(&mut self, dcd: &mut dyn Dcd, classes: &mut [&mut dyn Class]) {
        dcd.edpt_close_all();
        for class in classes.iter_mut() {
            class.close();
        }
        self.itf2drv = [NO_DRIVER; MAX_INTERFACES];
        self.ep2drv = [[NO_DRIVER; 2]; MAX_ENDPOINTS];
        self.busy = [[false; 2]; MAX_ENDPOINTS];
        self.configuration = 0;
    }

    fn interface_owner(&self, interface: u8) -> Option<usize> {
        self.itf2drv
            .get(interface as usize)
            .copied()
            .filter(|&driver| driver != NO_DRIVER)
            .map(usize::from)
    }

    fn endpoint_owner(&self, ep: EndpointAddress) -> Option<usize> {
        self.ep2drv
            .get(ep.index())
            .map(|dirs| dirs[dir_index(ep.direction())])
            .filter(|&driver| driver != NO_DRIVER)
            .map(usize::from)
    }

    fn attributes(&self) -> ConfigAttributes {
        let config = if self.configuration != 0 {
            self.descriptors.configuration_by_value(self.configuration)
        } else {
            self.descriptors.configuration(0)
        };
        config
            .and_then(|desc| ConfigurationDescriptor::parse(desc).ok())
            .map(|config| config.attributes)
            .unwrap_or(ConfigAttributes::empty())
    }

    fn on_setup(&mut self, dcd: &mut dyn Dcd, classes: &mut [&mut dyn Class], setup: &[u8; 8]) {
        self.connected = true;
        self.suspended = false;
        self.pending_address = None;

        let request = match Request::parse(setup) {
            Ok(request) => request,
            Err(_) => {
                warn!("MALFORMED SETUP");
                self.control.stall(dcd);
                return;
            }
        };
        trace!("SETUP {:?}", request);
        self.control.setup(request);

        let handled = match request.recipient {
            Recipient::Device => self.device_request(dcd, classes, &request),
            Recipient::Interface => self.interface_request(dcd, classes, &request),
            Recipient::Endpoint => self.endpoint_request(dcd, classes, &request),
            Recipient::Other => false,
        };
        if !handled {
            debug!("STALL REQUEST {}", request.request);
            self.control.stall(dcd);
        }
    }

    fn device_request(
        &mut self,
        dcd: &mut dyn Dcd,
        classes: &mut [&mut dyn Class],
        request: &Request,
    ) -> bool {
        match request.request_type {
            RequestType::Standard => {}
            // A class request to the device names its interface in wIndex.
            RequestType::Class => {
                return match self.interface_owner(request.index_low()) {
                    Some(driver) => self.class_request(dcd, classes, driver, request),
                    None => false,
                };
            }
            RequestType::Vendor => return false,
        }

        match request.request {
            standard::SET_ADDRESS => {
                if request.value > 127 || request.direction != UsbDirection::Out {
                    return false;
                }
                let address = request.value_low();
                if dcd.set_address_before_status() {
                    debug!("ADDRESS {}", address);
                    dcd.set_address(address);
                    self.addressed = true;
                } else {
                    self.pending_address = Some(address);
                }
                self.control.status(dcd);
                true
            }
            standard::GET_CONFIGURATION => {
                self.control.send(dcd, &[self.configuration]);
                true
            }
            standard::SET_CONFIGURATION => {
                self.set_configuration(dcd, classes, request.value_low())
            }
            standard::GET_DESCRIPTOR => self.get_descriptor(dcd, request),
            standard::SET_FEATURE | standard::CLEAR_FEATURE
                if request.value == feature::DEVICE_REMOTE_WAKEUP =>
            {
                self.remote_wakeup_enabled = request.request == standard::SET_FEATURE;
                self.control.status(dcd);
                true
            }
            standard::GET_STATUS => {
                let self_powered = self.attributes().contains(ConfigAttributes::SELF_POWERED);
                let status = self_powered as u8 | (self.remote_wakeup_enabled as u8) << 1;
                self.control.send(dcd, &[status, 0]);
                true
            }
            _ => false,
        }
    }

    fn get_descriptor(&mut self, dcd: &mut dyn Dcd, request: &Request) -> bool {
        let index = request.value_low();
        let descriptor = match request.value_high() {
            kind::DEVICE => {
                let device = self.descriptors.device();
                let mps = self.control.max_packet_size();
                // Before the address is set, some hosts reset the bus after
                // the first packet. Answer with exactly that packet.
                if !self.addressed && mps < device.len() && request.length as usize > device.len() {
                    Some(&device[..mps])
                } else {
                    Some(device)
                }
            }
            kind::CONFIGURATION => self.descriptors.configuration(index),
            kind::OTHER_SPEED_CONFIGURATION => self.descriptors.other_speed_configuration(index),
            kind::STRING => self.descriptors.string(index),
            kind::DEVICE_QUALIFIER => self.descriptors.device_qualifier(),
            kind::BOS => self.descriptors.bos(),
            _ => None,
        };
        match descriptor {
            Some(descriptor) => {
                self.control.send_static(dcd, descriptor);
                true
            }
            None => false,
        }
    }

    fn set_configuration(
        &mut self,
        dcd: &mut dyn Dcd,
        classes: &mut [&mut dyn Class],
        config: u8,
    ) -> bool {
        if config != 0 && self.descriptors.configuration_by_value(config).is_none() {
            warn!("NO CONFIGURATION {}", config);
            return false;
        }
        if config != self.configuration {
            if self.configuration != 0 {
                self.deconfigure(dcd, classes);
            }
            if config != 0 {
                if let Err(_err) = self.configure(dcd, classes, config) {
                    warn!("CONFIGURATION {} FAILED: {:?}", config, _err);
                    self.deconfigure(dcd, classes);
                    return false;
                }
            }
        }
        self.control.status(dcd);
        true
    }

    /// Open every interface of configuration `config`
    fn configure(
        &mut self,
        dcd: &mut dyn Dcd,
        classes: &mut [&mut dyn Class],
        config: u8,
    ) -> Result<()> {
        let descriptor = self
            .descriptors
            .configuration_by_value(config)
            .ok_or(Error::InvalidDescriptor)?;
        ConfigurationDescriptor::parse(descriptor)?;

        let mut rest = descriptor
            .get(descriptor[0] as usize..)
            .ok_or(Error::InvalidDescriptor)?;
        while !rest.is_empty() {
            let first = DescriptorIter::new(rest)
                .next()
                .ok_or(Error::InvalidDescriptor)?;
            if descriptor_type(first) != Some(kind::INTERFACE) {
                // Interface associations, and descriptors no driver claimed
                rest = &rest[first.len()..];
                continue;
            }

            let interface = InterfaceDescriptor::parse(first)?;
            match self.itf2drv.get(interface.number as usize) {
                None => return Err(Error::InvalidDescriptor),
                // An alternate setting that its driver didn't consume
                Some(&driver) if driver != NO_DRIVER && interface.alternate_setting != 0 => {
                    rest = &rest[first.len()..];
                    continue;
                }
                Some(&driver) if driver != NO_DRIVER => return Err(Error::InterfaceInUse),
                Some(_) => {}
            }

            let mut opened = None;
            for (index, class) in classes.iter_mut().enumerate() {
                if class.interface_class() != interface.class {
                    continue;
                }
                let mut ctx = Context::new(
                    &mut *dcd,
                    &mut self.events,
                    &mut self.busy,
                    &mut self.ep2drv,
                    index as u8,
                );
                match class.open(&mut ctx, &interface, rest) {
                    Ok(len) => {
                        debug!("{} OPENED INTERFACE {}", class.name(), interface.number);
                        opened = Some((index, len));
                        break;
                    }
                    Err(Error::UnsupportedInterface | Error::UnsupportedProtocol) => continue,
                    Err(err) => return Err(err),
                }
            }

            let (driver, len) = opened.ok_or(Error::NoDriver)?;
            let len = len.clamp(first.len(), rest.len());
            self.bind(driver, &rest[..len])?;
            rest = &rest[len..];
        }

        self.configuration = config;
        for (index, class) in classes.iter_mut().enumerate() {
            if self.itf2drv.contains(&(index as u8)) {
                let mut ctx = Context::new(
                    &mut *dcd,
                    &mut self.events,
                    &mut self.busy,
                    &mut self.ep2drv,
                    index as u8,
                );
                class.set_config(&mut ctx, config);
            }
        }
        Ok(())
    }

    /// Bind every interface and endpoint in `span` to `driver`
    fn bind(&mut self, driver: usize, span: &[u8]) -> Result<()> {
        for descriptor in DescriptorIter::new(span) {
            match descriptor_type(descriptor) {
                Some(kind::INTERFACE) => {
                    let interface = InterfaceDescriptor::parse(descriptor)?;
                    let owner = self
                        .itf2drv
                        .get_mut(interface.number as usize)
                        .ok_or(Error::InvalidDescriptor)?;
                    if *owner != NO_DRIVER && *owner as usize != driver {
                        return Err(Error::InterfaceInUse);
                    }
                    *owner = driver as u8;
                }
                Some(kind::ENDPOINT) => {
                    let Some(&address) = descriptor.get(2) else {
                        return Err(Error::InvalidDescriptor);
                    };
                    let ep = EndpointAddress::from(address);
                    if let Some(dirs) = self.ep2drv.get_mut(ep.index()) {
                        dirs[dir_index(ep.direction())] = driver as u8;
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn interface_request(
        &mut self,
        dcd: &mut dyn Dcd,
        classes: &mut [&mut dyn Class],
        request: &Request,
    ) -> bool {
        let Some(driver) = self.interface_owner(request.index_low()) else {
            return false;
        };
        if self.class_request(dcd, classes, driver, request) {
            return true;
        }
        if request.request_type != RequestType::Standard {
            return false;
        }
        match request.request {
            standard::GET_INTERFACE => {
                self.control.send(dcd, &[0]);
                true
            }
            standard::SET_INTERFACE if request.value == 0 => {
                self.control.status(dcd);
                true
            }
            standard::GET_STATUS => {
                self.control.send(dcd, &[0, 0]);
                true
            }
            _ => false,
        }
    }

    fn endpoint_request(
        &mut self,
        dcd: &mut dyn Dcd,
        classes: &mut [&mut dyn Class],
        request: &Request,
    ) -> bool {
        let ep = EndpointAddress::from(request.index_low());
        let owner = self.endpoint_owner(ep);
        if request.request_type != RequestType::Standard {
            return match owner {
                Some(driver) => self.class_request(dcd, classes, driver, request),
                None => false,
            };
        }

        match request.request {
            standard::GET_STATUS => {
                let halted = dcd.edpt_is_stalled(ep) as u8;
                self.control.send(dcd, &[halted, 0]);
                true
            }
            standard::SET_FEATURE | standard::CLEAR_FEATURE
                if request.value == feature::ENDPOINT_HALT =>
            {
                if ep.index() != 0 {
                    if request.request == standard::SET_FEATURE {
                        dcd.edpt_stall(ep);
                    } else {
                        dcd.edpt_clear_stall(ep);
                    }
                }
                if let Some(driver) = owner {
                    if let Some(class) = classes.get_mut(driver) {
                        let mut ctx = Context::new(
                            &mut *dcd,
                            &mut self.events,
                            &mut self.busy,
                            &mut self.ep2drv,
                            driver as u8,
                        );
                        let _ = class.control_request(&mut ctx, request);
                    }
                }
                self.control.status(dcd);
                true
            }
            _ => false,
        }
    }

    /// Offer a request to a class driver, and start its answer
    fn class_request(
        &mut self,
        dcd: &mut dyn Dcd,
        classes: &mut [&mut dyn Class],
        driver: usize,
        request: &Request,
    ) -> bool {
        let Some(class) = classes.get_mut(driver) else {
            return false;
        };
        self.control.set_owner(Owner::Class(driver));
        let mut ctx = Context::new(
            &mut *dcd,
            &mut self.events,
            &mut self.busy,
            &mut self.ep2drv,
            driver as u8,
        );
        match class.control_request(&mut ctx, request) {
            ControlReply::Reject => {
                self.control.set_owner(Owner::Device);
                false
            }
            ControlReply::Status => {
                self.control.status(dcd);
                true
            }
            ControlReply::In(data) => {
                self.control.send(dcd, data);
                true
            }
            ControlReply::Static(data) => {
                self.control.send_static(dcd, data);
                true
            }
            ControlReply::Out => {
                if self.control.receive(dcd, request.length as usize) {
                    true
                } else {
                    self.control.set_owner(Owner::Device);
                    false
                }
            }
        }
    }

    fn on_control_complete(
        &mut self,
        dcd: &mut dyn Dcd,
        classes: &mut [&mut dyn Class],
        completion: Completion,
    ) {
        match self.control.on_complete(dcd, completion) {
            Some(Step::DataReceived) => {
                let request = self.control.request().copied();
                let accepted = match (self.control.owner(), request) {
                    (Owner::Class(driver), Some(request)) => match classes.get_mut(driver) {
                        Some(class) => {
                            let mut ctx = Context::new(
                                &mut *dcd,
                                &mut self.events,
                                &mut self.busy,
                                &mut self.ep2drv,
                                driver as u8,
                            );
                            class.control_data(&mut ctx, &request, self.control.data())
                        }
                        None => false,
                    },
                    _ => false,
                };
                if accepted {
                    self.control.status(dcd);
                } else {
                    self.control.stall(dcd);
                }
            }
            Some(Step::Complete) => {
                if let Some(address) = self.pending_address.take() {
                    debug!("ADDRESS {}", address);
                    dcd.set_address(address);
                    self.addressed = true;
                }
            }
            None => {}
        }
    }

    fn on_xfer_complete(
        &mut self,
        dcd: &mut dyn Dcd,
        classes: &mut [&mut dyn Class],
        completion: Completion,
    ) {
        let ep = completion.ep;
        let Some(driver) = self.endpoint_owner(ep) else {
            trace!("EP{} HAS NO DRIVER", u8::from(ep));
            return;
        };
        if !completion.deferred {
            self.busy[ep.index()][dir_index(ep.direction())] = false;
        }
        let Some(class) = classes.get_mut(driver) else {
            return;
        };
        let mut ctx = Context::new(
            dcd,
            &mut self.events,
            &mut self.busy,
            &mut self.ep2drv,
            driver as u8,
        );
        class.xfer_complete(&mut ctx, completion);
    }
}
