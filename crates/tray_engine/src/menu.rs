//! Placement of applet context menus on screen.
//!
//! Rectangles follow the usual raster convention: `right()` and `bottom()` are the last pixel
//! that is still inside.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, derive_more::Display)]
#[display("{x}x{y}")]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub fn new(x: i32, y: i32) -> Self {
        Point { x, y }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Size {
    pub width: i32,
    pub height: i32,
}

impl Size {
    pub fn new(width: i32, height: i32) -> Self {
        Size { width, height }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Rect {
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Rect { x, y, width, height }
    }

    pub fn left(&self) -> i32 {
        self.x
    }

    pub fn top(&self) -> i32 {
        self.y
    }

    pub fn right(&self) -> i32 {
        self.x + self.width - 1
    }

    pub fn bottom(&self) -> i32 {
        self.y + self.height - 1
    }
}

/// Screen edge the tray container is docked to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DockEdge {
    Left,
    Right,
    Top,
    Bottom,
    /// Not docked to any edge, e.g. a tray on the desktop.
    Floating,
}

/// The visual item a menu is requested for.
pub trait MenuAnchor {
    /// Map item-local coordinates to global screen coordinates. `None` if the item is not shown on
    /// any screen.
    fn map_to_global(&self, local: Point) -> Option<Point>;

    fn size(&self) -> Size;

    /// Geometry of the screen the item is on.
    fn screen_geometry(&self) -> Option<Rect>;

    /// Like [`Self::screen_geometry`], minus panels and other reserved space.
    fn available_geometry(&self) -> Option<Rect>;

    /// Drop any pointer grab the item's window still holds.
    ///
    /// When a window that doesn't take focus opens another window that does while the button is
    /// held, the release is never delivered and the next click gets swallowed.
    fn release_pointer_grab(&self);
}

/// Global position of the item-local point `(x, y)`, or the origin if the item isn't on a screen.
pub fn popup_position(anchor: &dyn MenuAnchor, x: i32, y: i32) -> Point {
    anchor.map_to_global(Point::new(x, y)).unwrap_or_default()
}

/// Move `pos` so that a menu of size `menu` fits into `available`, preferring the top left corner
/// if it doesn't fit at all.
pub fn clamp_to_available(pos: Point, menu: Size, available: Rect) -> Point {
    let bound = |min: i32, value: i32, max: i32| min.max(value.min(max));
    Point::new(
        bound(available.left(), pos.x, available.right() - menu.width),
        bound(available.top(), pos.y, available.bottom() - menu.height),
    )
}

/// Where to open the context menu of an applet that was clicked at item-local `(x, y)`.
///
/// Returns `None` if the menu would be empty, in which case nothing should be shown.
pub fn applet_menu_position(anchor: &dyn MenuAnchor, x: i32, y: i32, menu: Size, action_count: usize) -> Option<Point> {
    anchor.release_pointer_grab();
    if action_count == 0 {
        return None;
    }
    let pos = popup_position(anchor, x, y);
    Some(match anchor.available_geometry() {
        Some(available) => clamp_to_available(pos, menu, available),
        None => pos,
    })
}

/// Screen rectangle covered by the item, or `None` if it isn't on a screen.
pub fn item_screen_rect(anchor: &dyn MenuAnchor) -> Option<Rect> {
    let origin = anchor.map_to_global(Point::default())?;
    let size = anchor.size();
    Some(Rect::new(origin.x, origin.y, size.width, size.height))
}

/// Where to open the menu of a status notifier item covering `item`, so that it sits next to the
/// item on the side facing away from the docked edge.
pub fn status_notifier_menu_position(item: Rect, menu: Size, edge: DockEdge, screen: Rect) -> Point {
    match edge {
        DockEdge::Left => Point::new(item.right(), item.top()),
        DockEdge::Right => Point::new(item.left() - menu.width, item.top()),
        DockEdge::Top => Point::new(item.left(), item.bottom()),
        DockEdge::Bottom => Point::new(item.left(), item.top() - menu.height),
        DockEdge::Floating => {
            if item.top() - menu.height >= screen.top() {
                Point::new(item.left(), item.top() - menu.height)
            } else {
                Point::new(item.left(), item.bottom())
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::cell::Cell;

    struct Item {
        origin: Option<Point>,
        available: Option<Rect>,
        grab_released: Cell<bool>,
    }

    impl Item {
        fn at(origin: Option<Point>) -> Self {
            Item { origin, available: Some(Rect::new(0, 0, 1920, 1080)), grab_released: Cell::new(false) }
        }
    }

    impl MenuAnchor for Item {
        fn map_to_global(&self, local: Point) -> Option<Point> {
            self.origin.map(|o| Point::new(o.x + local.x, o.y + local.y))
        }

        fn size(&self) -> Size {
            Size::new(22, 22)
        }

        fn screen_geometry(&self) -> Option<Rect> {
            self.available
        }

        fn available_geometry(&self) -> Option<Rect> {
            self.available
        }

        fn release_pointer_grab(&self) {
            self.grab_released.set(true);
        }
    }

    #[test]
    fn test_popup_position() {
        assert_eq!(Point::new(110, 205), popup_position(&Item::at(Some(Point::new(100, 200))), 10, 5));
        assert_eq!(Point::new(0, 0), popup_position(&Item::at(None), 10, 5));
    }

    #[test]
    fn test_clamp_to_available() {
        let screen = Rect::new(0, 0, 1920, 1080);
        let menu = Size::new(200, 300);
        assert_eq!(Point::new(500, 500), clamp_to_available(Point::new(500, 500), menu, screen));
        assert_eq!(Point::new(1719, 779), clamp_to_available(Point::new(1900, 1000), menu, screen));
        assert_eq!(Point::new(0, 0), clamp_to_available(Point::new(-20, -5), menu, screen));
    }

    #[test]
    fn test_applet_menu_releases_grab_and_skips_empty() {
        let item = Item::at(Some(Point::new(1900, 1060)));
        assert_eq!(None, applet_menu_position(&item, 0, 0, Size::new(100, 100), 0));
        assert!(item.grab_released.get());
        assert_eq!(Some(Point::new(1819, 979)), applet_menu_position(&item, 0, 0, Size::new(100, 100), 3));
    }

    #[test]
    fn test_item_screen_rect() {
        assert_eq!(Some(Rect::new(40, 50, 22, 22)), item_screen_rect(&Item::at(Some(Point::new(40, 50)))));
        assert_eq!(None, item_screen_rect(&Item::at(None)));
    }

    #[test]
    fn test_status_notifier_menu_per_edge() {
        let screen = Rect::new(0, 0, 1920, 1080);
        let menu = Size::new(150, 200);
        let item = Rect::new(100, 1050, 30, 30);
        assert_eq!(Point::new(129, 1050), status_notifier_menu_position(item, menu, DockEdge::Left, screen));
        assert_eq!(Point::new(-50, 1050), status_notifier_menu_position(item, menu, DockEdge::Right, screen));
        assert_eq!(Point::new(100, 1079), status_notifier_menu_position(item, menu, DockEdge::Top, screen));
        assert_eq!(Point::new(100, 850), status_notifier_menu_position(item, menu, DockEdge::Bottom, screen));
    }

    #[test]
    fn test_floating_menu_opens_below_without_room_above() {
        let screen = Rect::new(0, 0, 1920, 1080);
        let menu = Size::new(150, 200);
        assert_eq!(Point::new(100, 300), status_notifier_menu_position(Rect::new(100, 500, 30, 30), menu, DockEdge::Floating, screen));
        assert_eq!(Point::new(100, 79), status_notifier_menu_position(Rect::new(100, 50, 30, 30), menu, DockEdge::Floating, screen));
    }
}
