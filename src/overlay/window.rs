use crate::host::{Host, HostWindowGuard};
use crate::overlay::controller::OverlayController;
use crate::overlay::dispatch::{ActionDispatcher, SessionLog};
use crate::overlay::messages::{CloseReason, MainToOverlay, OverlayToMain};
use crate::overlay::settings::OverlaySettings;
use crate::overlay::surface::{OverlaySurface, Placement, SurfaceFactory};
use anyhow::{anyhow, Result};
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

const OVERLAY_PUMP_INTERVAL: Duration = Duration::from_millis(16);

pub struct OverlayHandles {
    pub overlay_thread_handle: JoinHandle<()>,
    pub main_to_overlay_tx: Sender<MainToOverlay>,
    pub overlay_to_main_rx: Receiver<OverlayToMain>,
}

/// Everything a session thread needs, moved onto it at spawn.
pub struct SessionContext {
    pub settings: Arc<OverlaySettings>,
    pub placement: Placement,
    pub host: Arc<dyn Host>,
    pub host_window: Option<HostWindowGuard>,
    pub surface_factory: SurfaceFactory,
}

fn send_exit_after_cleanup<F>(
    cleanup: F,
    overlay_to_main_tx: &Sender<OverlayToMain>,
    reason: CloseReason,
) where
    F: FnOnce(),
{
    cleanup();
    let _ = overlay_to_main_tx.send(OverlayToMain::Exited { reason });
}

pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

pub fn spawn_overlay(context: SessionContext) -> Result<OverlayHandles> {
    let (main_to_overlay_tx, main_to_overlay_rx) = channel::<MainToOverlay>();
    let (overlay_to_main_tx, overlay_to_main_rx) = channel::<OverlayToMain>();

    let overlay_thread_handle = thread::Builder::new()
        .name("input-overlay".to_string())
        .spawn(move || {
            let host_window = context.host_window.clone();
            let exit_tx = overlay_to_main_tx.clone();
            let result = panic::catch_unwind(AssertUnwindSafe(|| {
                run_session(context, main_to_overlay_rx, overlay_to_main_tx)
            }));
            if let Err(payload) = result {
                let panic_message = panic_message(payload.as_ref());
                tracing::error!(panic_message, "input overlay thread panicked");
                send_exit_after_cleanup(
                    || {
                        if let Some(guard) = host_window {
                            guard.restore();
                        }
                    },
                    &exit_tx,
                    CloseReason::OverlayFailure,
                );
            }
        })
        .map_err(|err| anyhow!("failed to spawn input overlay thread: {err}"))?;

    Ok(OverlayHandles {
        overlay_thread_handle,
        main_to_overlay_tx,
        overlay_to_main_rx,
    })
}

fn run_session(
    context: SessionContext,
    main_to_overlay_rx: Receiver<MainToOverlay>,
    overlay_to_main_tx: Sender<OverlayToMain>,
) {
    let SessionContext {
        settings,
        placement,
        host,
        host_window,
        surface_factory,
    } = context;
    let log = SessionLog::new(host.clone(), settings.logging);

    let mut surface = match surface_factory(settings.as_ref(), placement) {
        Ok(surface) => surface,
        Err(err) => {
            log.error(&format!("Error showing input overlay: {err:#}"));
            let _ = overlay_to_main_tx.send(OverlayToMain::Exited {
                reason: CloseReason::StartFailure,
            });
            return;
        }
    };

    if let Some(guard) = &host_window {
        guard.disable();
    }

    let dispatcher = ActionDispatcher::new(host, log);
    let mut controller = OverlayController::new(
        settings.clone(),
        dispatcher,
        main_to_overlay_rx,
        overlay_to_main_tx.clone(),
    );
    controller.publish_text(surface.text());
    surface.show();
    let _ = overlay_to_main_tx.send(OverlayToMain::Shown);
    tracing::debug!(x = placement.x, y = placement.y, "input overlay shown");

    loop {
        surface.pump(OVERLAY_PUMP_INTERVAL, &mut |event| {
            controller.handle_surface_event(event)
        });
        controller.pump_runtime_messages();

        if let Some(reason) = controller.complete_close() {
            close_surface(surface.as_mut(), host_window.as_ref(), &overlay_to_main_tx, reason);
            break;
        }
    }
}

fn close_surface(
    surface: &mut dyn OverlaySurface,
    host_window: Option<&HostWindowGuard>,
    overlay_to_main_tx: &Sender<OverlayToMain>,
    reason: CloseReason,
) {
    send_exit_after_cleanup(
        || {
            surface.close();
            if let Some(guard) = host_window {
                guard.restore();
            }
        },
        overlay_to_main_tx,
        reason,
    );
    tracing::debug!(?reason, "input overlay closed");
}

/// The platform surface: a native popup edit box on Windows.
pub fn default_surface_factory() -> SurfaceFactory {
    #[cfg(windows)]
    {
        Arc::new(|settings: &OverlaySettings, placement: Placement| {
            platform::NativeSurface::create(settings, placement)
                .map(|surface| Box::new(surface) as Box<dyn OverlaySurface>)
        })
    }
    #[cfg(not(windows))]
    {
        Arc::new(
            |_settings: &OverlaySettings, _placement: Placement| -> Result<Box<dyn OverlaySurface>> {
                Err(anyhow!("no native overlay surface on this platform"))
            },
        )
    }
}

#[cfg(windows)]
mod platform {
    use crate::overlay::fonts::family_name;
    use crate::overlay::input::{KeyCode, KeyEvent, KeyModifiers};
    use crate::overlay::settings::{OverlaySettings, TextAlign, TextDirection};
    use crate::overlay::surface::{
        utf16_offset_to_char_index, EventDisposition, OverlaySurface, Placement, SurfaceEvent,
        Utf16Assembler, Utf16Unit,
    };
    use anyhow::{anyhow, Result};
    use once_cell::sync::Lazy;
    use std::collections::HashMap;
    use std::path::Path;
    use std::sync::mpsc::{channel, Receiver, Sender};
    use std::sync::{Mutex, Once};
    use std::time::{Duration, Instant};
    use windows::core::PCWSTR;
    use windows::Win32::Foundation::{COLORREF, HWND, LPARAM, LRESULT, RECT, WPARAM};
    use windows::Win32::Graphics::Gdi::{
        AddFontResourceExW, CreateFontIndirectW, CreateSolidBrush, DeleteObject, FillRect,
        RemoveFontResourceExW, SetBkColor, SetTextColor, FR_PRIVATE, HBRUSH, HDC, HFONT, LOGFONTW,
    };
    use windows::Win32::System::LibraryLoader::GetModuleHandleW;
    use windows::Win32::UI::Input::KeyboardAndMouse::{
        GetKeyState, SetFocus, VK_CONTROL, VK_ESCAPE, VK_RETURN, VK_SHIFT,
    };
    use windows::Win32::UI::WindowsAndMessaging::{
        CreateWindowExW, DefWindowProcW, DestroyWindow, DispatchMessageW, GetClientRect,
        GetWindowTextLengthW, GetWindowTextW, PeekMessageW, RegisterClassW, SendMessageW,
        SetForegroundWindow, SetWindowPos, SetWindowTextW, ShowWindow, TranslateMessage,
        HWND_NOTOPMOST, HWND_TOPMOST, MSG, PM_REMOVE, SWP_NOACTIVATE, SWP_NOMOVE, SWP_NOSIZE,
        SW_SHOW, WINDOW_EX_STYLE, WINDOW_STYLE, WM_ACTIVATE, WM_CHAR, WM_CLOSE, WM_COMMAND,
        WM_CTLCOLOREDIT, WM_ERASEBKGND, WM_KEYDOWN, WM_SETFONT, WNDCLASSW, WS_CHILD,
        WS_EX_RTLREADING, WS_EX_TOOLWINDOW, WS_EX_TOPMOST, WS_POPUP, WS_VISIBLE, WS_VSCROLL,
    };

    const ES_CENTER: u32 = 0x0001;
    const ES_RIGHT: u32 = 0x0002;
    const ES_MULTILINE: u32 = 0x0004;
    const ES_PASSWORD: u32 = 0x0020;
    const ES_AUTOVSCROLL: u32 = 0x0040;
    const ES_AUTOHSCROLL: u32 = 0x0080;
    const ES_WANTRETURN: u32 = 0x1000;
    const EM_GETSEL: u32 = 0x00B0;
    const EM_SETSEL: u32 = 0x00B1;
    const EM_LIMITTEXT: u32 = 0x00C5;
    const EN_CHANGE: usize = 0x0300;
    const WA_INACTIVE: usize = 0;

    struct WindowShared {
        events: Sender<SurfaceEvent>,
        edit: isize,
        frame_brush: isize,
        background_brush: isize,
        background: u32,
        font_color: u32,
    }

    static SURFACES: Lazy<Mutex<HashMap<isize, WindowShared>>> =
        Lazy::new(|| Mutex::new(HashMap::new()));

    fn widestring(value: &str) -> Vec<u16> {
        use std::os::windows::ffi::OsStrExt;
        std::ffi::OsStr::new(value)
            .encode_wide()
            .chain(std::iter::once(0))
            .collect()
    }

    fn hwnd_key(hwnd: HWND) -> isize {
        hwnd.0 as isize
    }

    fn window_text(hwnd: HWND) -> String {
        unsafe {
            let len = GetWindowTextLengthW(hwnd);
            if len <= 0 {
                return String::new();
            }
            let mut buffer = vec![0u16; len as usize + 1];
            let copied = GetWindowTextW(hwnd, &mut buffer);
            String::from_utf16_lossy(&buffer[..copied.max(0) as usize])
        }
    }

    fn key_pressed(vk: u16) -> bool {
        unsafe { GetKeyState(vk as i32) < 0 }
    }

    fn edit_text(hwnd: HWND) -> String {
        let edit = SURFACES
            .lock()
            .ok()
            .and_then(|s| s.get(&hwnd_key(hwnd)).map(|w| w.edit));
        edit.map(|edit| window_text(HWND(edit as *mut _)))
            .unwrap_or_default()
    }

    fn send_event(hwnd: HWND, event: SurfaceEvent) {
        if let Ok(surfaces) = SURFACES.lock() {
            if let Some(shared) = surfaces.get(&hwnd_key(hwnd)) {
                let _ = shared.events.send(event);
            }
        }
    }

    unsafe extern "system" fn overlay_wndproc(
        hwnd: HWND,
        msg: u32,
        wparam: WPARAM,
        lparam: LPARAM,
    ) -> LRESULT {
        match msg {
            WM_ERASEBKGND => {
                let brush = SURFACES
                    .lock()
                    .ok()
                    .and_then(|s| s.get(&hwnd_key(hwnd)).map(|w| w.frame_brush));
                if let Some(brush) = brush {
                    let mut rect = RECT::default();
                    unsafe {
                        let _ = GetClientRect(hwnd, &mut rect);
                        let _ = FillRect(HDC(wparam.0 as *mut _), &rect, HBRUSH(brush as *mut _));
                    }
                }
                LRESULT(1)
            }
            WM_CTLCOLOREDIT => {
                let colors = SURFACES.lock().ok().and_then(|s| {
                    s.get(&hwnd_key(hwnd))
                        .map(|w| (w.background_brush, w.background, w.font_color))
                });
                match colors {
                    Some((brush, background, font_color)) => {
                        let hdc = HDC(wparam.0 as *mut _);
                        unsafe {
                            let _ = SetTextColor(hdc, COLORREF(font_color));
                            let _ = SetBkColor(hdc, COLORREF(background));
                        }
                        LRESULT(brush)
                    }
                    None => unsafe { DefWindowProcW(hwnd, msg, wparam, lparam) },
                }
            }
            WM_COMMAND => {
                if (wparam.0 >> 16) & 0xffff == EN_CHANGE {
                    let text = window_text(HWND(lparam.0 as *mut _));
                    send_event(hwnd, SurfaceEvent::TextChanged(text));
                }
                LRESULT(0)
            }
            WM_ACTIVATE => {
                if wparam.0 & 0xffff == WA_INACTIVE {
                    let field_text = edit_text(hwnd);
                    send_event(hwnd, SurfaceEvent::FocusLost { field_text });
                }
                unsafe { DefWindowProcW(hwnd, msg, wparam, lparam) }
            }
            WM_CLOSE => {
                send_event(hwnd, SurfaceEvent::Closed);
                LRESULT(0)
            }
            _ => unsafe { DefWindowProcW(hwnd, msg, wparam, lparam) },
        }
    }

    fn edit_style(settings: &OverlaySettings) -> u32 {
        let mut style = WS_CHILD.0 | WS_VISIBLE.0;
        style |= match settings.align {
            TextAlign::Left => 0,
            TextAlign::Center => ES_CENTER,
            TextAlign::Right => ES_RIGHT,
        };
        if settings.multiline {
            style |= ES_MULTILINE | ES_AUTOVSCROLL | ES_WANTRETURN;
        } else {
            style |= ES_AUTOHSCROLL;
        }
        if settings.shows_scrollbar() {
            style |= WS_VSCROLL.0;
        }
        if settings.password {
            style |= ES_PASSWORD;
        }
        style
    }

    fn create_font(settings: &OverlaySettings) -> HFONT {
        let mut logfont = LOGFONTW {
            lfHeight: -(settings.font_size * 96 / 72),
            lfWeight: if settings.font_style.is_bold() { 700 } else { 400 },
            lfItalic: settings.font_style.is_italic() as u8,
            ..Default::default()
        };
        let face: Vec<u16> = family_name(&settings.font_face)
            .encode_utf16()
            .take(31)
            .collect();
        logfont.lfFaceName[..face.len()].copy_from_slice(&face);
        unsafe { CreateFontIndirectW(&logfont) }
    }

    pub struct NativeSurface {
        hwnd: HWND,
        edit: HWND,
        font: HFONT,
        private_font: Option<Vec<u16>>,
        events: Receiver<SurfaceEvent>,
        utf16: Utf16Assembler,
        pending_high: Option<MSG>,
        placement: Placement,
        top_most: bool,
    }

    impl NativeSurface {
        pub fn create(settings: &OverlaySettings, placement: Placement) -> Result<Self> {
            static REGISTER_CLASS: Once = Once::new();
            let class_name = widestring("InputOverlayWindow");
            let hinstance = unsafe { GetModuleHandleW(PCWSTR::null()) }
                .map_err(|err| anyhow!("module handle unavailable: {err}"))?;

            REGISTER_CLASS.call_once(|| unsafe {
                let wc = WNDCLASSW {
                    hInstance: hinstance.into(),
                    lpszClassName: PCWSTR(class_name.as_ptr()),
                    lpfnWndProc: Some(overlay_wndproc),
                    ..Default::default()
                };
                let _ = RegisterClassW(&wc);
            });

            let mut ex_style = WS_EX_TOOLWINDOW;
            if settings.top_most {
                ex_style |= WS_EX_TOPMOST;
            }
            let hwnd = unsafe {
                CreateWindowExW(
                    ex_style,
                    PCWSTR(class_name.as_ptr()),
                    PCWSTR::null(),
                    WS_POPUP,
                    placement.x,
                    placement.y,
                    settings.width,
                    settings.height,
                    None,
                    None,
                    hinstance,
                    None,
                )
            }
            .map_err(|err| anyhow!("failed to create overlay window: {err}"))?;

            let inset = settings.visible_border().map(|b| b.thickness).unwrap_or(0);
            let mut edit_ex_style = WINDOW_EX_STYLE::default();
            if settings.direction == TextDirection::RightToLeft {
                edit_ex_style |= WS_EX_RTLREADING;
            }
            let edit_class = widestring("EDIT");
            let edit = unsafe {
                CreateWindowExW(
                    edit_ex_style,
                    PCWSTR(edit_class.as_ptr()),
                    PCWSTR::null(),
                    WINDOW_STYLE(edit_style(settings)),
                    inset,
                    inset,
                    (settings.width - 2 * inset).max(1),
                    (settings.height - 2 * inset).max(1),
                    hwnd,
                    None,
                    hinstance,
                    None,
                )
            };
            let edit = match edit {
                Ok(edit) => edit,
                Err(err) => {
                    unsafe {
                        let _ = DestroyWindow(hwnd);
                    }
                    return Err(anyhow!("failed to create overlay edit field: {err}"));
                }
            };

            let private_font = Path::new(&settings.font_source).is_file().then(|| {
                let path = widestring(&settings.font_source);
                unsafe {
                    let _ = AddFontResourceExW(PCWSTR(path.as_ptr()), FR_PRIVATE, None);
                }
                path
            });
            let font = create_font(settings);

            let frame_color = settings
                .visible_border()
                .map(|b| b.color)
                .unwrap_or(settings.background);
            let (events_tx, events) = channel();
            unsafe {
                let frame_brush = CreateSolidBrush(COLORREF(frame_color.to_colorref()));
                let background_brush =
                    CreateSolidBrush(COLORREF(settings.background.to_colorref()));
                if let Ok(mut surfaces) = SURFACES.lock() {
                    surfaces.insert(
                        hwnd_key(hwnd),
                        WindowShared {
                            events: events_tx,
                            edit: hwnd_key(edit),
                            frame_brush: frame_brush.0 as isize,
                            background_brush: background_brush.0 as isize,
                            background: settings.background.to_colorref(),
                            font_color: settings.font_color.to_colorref(),
                        },
                    );
                }

                SendMessageW(edit, WM_SETFONT, WPARAM(font.0 as usize), LPARAM(1));
                if settings.input_limit > 0 {
                    SendMessageW(edit, EM_LIMITTEXT, WPARAM(settings.input_limit), LPARAM(0));
                }
                let initial = widestring(&settings.default_value);
                let _ = SetWindowTextW(edit, PCWSTR(initial.as_ptr()));
                SendMessageW(edit, EM_SETSEL, WPARAM(usize::MAX >> 1), LPARAM(-1));
            }

            Ok(Self {
                hwnd,
                edit,
                font,
                private_font,
                events,
                utf16: Utf16Assembler::default(),
                pending_high: None,
                placement,
                top_most: settings.top_most,
            })
        }

        fn caret(&self) -> usize {
            let mut start: u32 = 0;
            unsafe {
                SendMessageW(
                    self.edit,
                    EM_GETSEL,
                    WPARAM(&mut start as *mut u32 as usize),
                    LPARAM(0),
                );
            }
            start as usize
        }

        fn drain_events(
            &self,
            handler: &mut dyn FnMut(SurfaceEvent) -> EventDisposition,
        ) -> bool {
            let mut drained = false;
            while let Ok(event) = self.events.try_recv() {
                drained = true;
                handler(event);
            }
            drained
        }

        /// Route one queued message through `handler`. Returns `false` when
        /// the message was suppressed and must not be dispatched.
        fn filter_message(
            &mut self,
            msg: &MSG,
            handler: &mut dyn FnMut(SurfaceEvent) -> EventDisposition,
        ) -> bool {
            if msg.hwnd != self.edit {
                return true;
            }
            match msg.message {
                WM_KEYDOWN => {
                    let key = match msg.wParam.0 as u16 {
                        vk if vk == VK_ESCAPE.0 => KeyCode::Escape,
                        vk if vk == VK_RETURN.0 => KeyCode::Enter,
                        _ => return true,
                    };
                    let event = KeyEvent {
                        key,
                        modifiers: KeyModifiers {
                            ctrl: key_pressed(VK_CONTROL.0),
                            shift: key_pressed(VK_SHIFT.0),
                        },
                    };
                    let key_down = SurfaceEvent::KeyDown {
                        key: event,
                        field_text: window_text(self.edit),
                    };
                    handler(key_down) == EventDisposition::Pass
                }
                WM_CHAR => {
                    // Non-BMP characters arrive as two WM_CHARs. The high half
                    // is held back until the pair has been validated.
                    let ch = match self.utf16.push(msg.wParam.0 as u16) {
                        Utf16Unit::Pending => {
                            self.pending_high = Some(*msg);
                            return false;
                        }
                        Utf16Unit::Unpaired => {
                            self.pending_high = None;
                            return false;
                        }
                        Utf16Unit::Char(ch) => ch,
                    };
                    let high = self.pending_high.take().filter(|_| ch.len_utf16() == 2);
                    let field_text = window_text(self.edit);
                    let cursor = utf16_offset_to_char_index(&field_text, self.caret());
                    let passed = handler(SurfaceEvent::Char {
                        ch,
                        field_text,
                        cursor,
                    }) == EventDisposition::Pass;
                    if passed {
                        if let Some(high) = high {
                            unsafe {
                                let _ = DispatchMessageW(&high);
                            }
                        }
                    }
                    passed
                }
                _ => true,
            }
        }
    }

    impl OverlaySurface for NativeSurface {
        fn show(&mut self) {
            unsafe {
                let _ = ShowWindow(self.hwnd, SW_SHOW);
                if let Some(owner) = self.placement.owner {
                    // Keep the host window directly beneath the overlay.
                    let _ = SetWindowPos(
                        HWND(owner as *mut _),
                        self.hwnd,
                        0,
                        0,
                        0,
                        0,
                        SWP_NOMOVE | SWP_NOSIZE | SWP_NOACTIVATE,
                    );
                }
                let insert_after = if self.top_most {
                    HWND_TOPMOST
                } else {
                    HWND_NOTOPMOST
                };
                let _ = SetWindowPos(self.hwnd, insert_after, 0, 0, 0, 0, SWP_NOMOVE | SWP_NOSIZE);
                let _ = SetForegroundWindow(self.hwnd);
                let _ = SetFocus(self.edit);
            }
        }

        fn text(&self) -> String {
            window_text(self.edit)
        }

        fn pump(
            &mut self,
            timeout: Duration,
            handler: &mut dyn FnMut(SurfaceEvent) -> EventDisposition,
        ) {
            let deadline = Instant::now() + timeout;
            loop {
                let mut handled_any = false;
                unsafe {
                    let mut msg = MSG::default();
                    while PeekMessageW(&mut msg, HWND::default(), 0, 0, PM_REMOVE).into() {
                        handled_any = true;
                        if self.filter_message(&msg, handler) {
                            let _ = TranslateMessage(&msg);
                            let _ = DispatchMessageW(&msg);
                        }
                        // EN_CHANGE for this message lands before the next key is filtered.
                        self.drain_events(handler);
                    }
                }
                if self.drain_events(handler) {
                    handled_any = true;
                }
                if handled_any || Instant::now() >= deadline {
                    return;
                }
                std::thread::sleep(Duration::from_millis(1));
            }
        }

        fn close(&mut self) {
            if self.hwnd.0.is_null() {
                return;
            }
            unsafe {
                let shared = SURFACES
                    .lock()
                    .ok()
                    .and_then(|mut s| s.remove(&hwnd_key(self.hwnd)));
                let _ = DestroyWindow(self.hwnd);
                if let Some(shared) = shared {
                    let _ = DeleteObject(HBRUSH(shared.frame_brush as *mut _));
                    let _ = DeleteObject(HBRUSH(shared.background_brush as *mut _));
                }
                if !self.font.0.is_null() {
                    let _ = DeleteObject(self.font);
                    self.font = HFONT::default();
                }
                if let Some(path) = self.private_font.take() {
                    let _ = RemoveFontResourceExW(PCWSTR(path.as_ptr()), FR_PRIVATE.0, None);
                }
            }
            self.hwnd = HWND::default();
            self.edit = HWND::default();
        }
    }

    impl Drop for NativeSurface {
        fn drop(&mut self) {
            self.close();
        }
    }
}
