//! Exemption tables for historical anomalies that Validator and
//! RetentionEngine must forgive rather than flag as new errors. Keeping new
//! uses of the same anomaly visible is the point: entries here are not
//! meant to grow.

use std::collections::HashMap;
use std::sync::LazyLock;

pub static SELF_REQUIRES: LazyLock<Vec<&'static str>> =
    LazyLock::new(|| vec!["cygwin-debuginfo"]);

pub static SELF_SOURCE: LazyLock<Vec<&'static str>> = LazyLock::new(|| {
    vec!["R_autorebase", "base-cygwin", "chere", "cygcheck-dep"]
});

pub static NONUNIQUE_VERSIONS: LazyLock<Vec<&'static str>> = LazyLock::new(|| {
    vec![
        "bzr-debuginfo",
        "cgdb-debuginfo",
        "dolphin4",
        "gcc-java",
        "kdepasswd",
        "kexi",
        "kfilereplace",
        "libcaca-doc",
        "libfltk-doc",
        "libgcj-common",
        "libical_cxx-devel",
        "libquota-devel",
        "libtxc_dxtn",
        "minizip",
        "mutter-doc",
        "ocaml-camlp4",
        "okular4-part",
        "sng-debuginfo",
        "sqlite3-zlib",
        "w3m-img",
    ]
});

pub static MAINT_ANOMALIES: LazyLock<Vec<&'static str>> = LazyLock::new(|| vec!["manlint"]);

/// package -> obsoleting package(s) that should have been declared but
/// weren't, injected as historical gaps during validation.
pub static MISSING_OBSOLETE: LazyLock<HashMap<&'static str, Vec<&'static str>>> =
    LazyLock::new(|| {
        HashMap::from([
            ("filemanager-actions-debuginfo", vec!["caja-actions-debuginfo"]),
            ("guile2.2-debuginfo", vec!["guile-debuginfo"]),
            ("librsync-debuginfo", vec!["rdiff-debuginfo"]),
            ("man-db-debuginfo", vec!["man-debuginfo"]),
            ("procps-ng", vec!["procps"]),
            ("procps-ng-debuginfo", vec!["procps-debuginfo"]),
            ("python2-debuginfo", vec!["python-debuginfo"]),
            ("python-dbus-debuginfo", vec!["python3-dbus-debuginfo"]),
            ("rxvt-unicode-debuginfo", vec!["rxvt-unicode-X-debuginfo"]),
            ("spectacle-debuginfo", vec!["ksnapshot-debuginfo"]),
            ("xfce4-pulseaudio-plugin-debuginfo", vec!["xfce4-mixer-debuginfo"]),
            ("xfig-debuginfo", vec!["transfig-debuginfo"]),
        ])
    });

pub static HISTORICAL_PROVIDES: LazyLock<Vec<&'static str>> = LazyLock::new(|| {
    vec![
        "rdiff-debuginfo",
        "rxvt-unicode-X-debuginfo",
        "xfce4-mixer-debuginfo",
        "python3-dbus-debuginfo",
    ]
});

/// Plain names (no regex) known not to exist, beyond the historical
/// provides list.
pub static NONEXISTENT_PROVIDES_LITERAL: LazyLock<Vec<&'static str>> = LazyLock::new(|| {
    vec![
        "python35",
        "python35-gi",
        "glade3",
        "python2",
        "python2-devel",
        "python27",
        "python-appindicator",
        "python-gconf2",
        "python-gnome2",
        "python-gnomevfs2",
        "python-gtk2.0",
        "python-keybinder",
        "python-pynotify",
        "python-vte",
        "python-wnck",
        "python-zeitgeist",
        "python2-avahi",
        "python2-ayatana_appindicator",
        "python2-gobject",
        "python2-ipaddr",
        "python2-libvirt",
        "python2-matemenu",
        "python2-pykde4",
        "python2-pyqt4",
        "python2-pyqt5",
        "libtidy0_99_0",
        "_windows",
    ]
});

fn digits_suffix(name: &str, prefix: &str) -> bool {
    name.strip_prefix(prefix)
        .is_some_and(|rest| !rest.is_empty() && rest.bytes().all(|b| b.is_ascii_digit()))
}

pub fn is_nonexistent_provide(name: &str) -> bool {
    if HISTORICAL_PROVIDES.contains(&name) || NONEXISTENT_PROVIDES_LITERAL.contains(&name) {
        return true;
    }
    name.starts_with("python27-")
        || digits_suffix(name, "perl5_")
        || digits_suffix(name, "ruby_")
        || digits_suffix(name, "tl_basic_")
        || digits_suffix(name, "tl_")
}

pub static SUBSTITUTE_DEPENDENCY: LazyLock<HashMap<&'static str, &'static str>> =
    LazyLock::new(|| {
        HashMap::from([
            ("python-avahi", "python2-avahi"),
            ("python-cairo", "python27-cairo"),
            ("python-dbus", "python27-dbus"),
            ("python-gobject", "python2-gobject"),
            ("python2-dbus", "python27-dbus"),
            ("python2-gi", "python27-gi"),
        ])
    });

pub static EXPIRED_PROVIDES: LazyLock<Vec<&'static str>> =
    LazyLock::new(|| vec!["python34", "python35"]);

/// source package -> versions that are legitimately empty but not obsolete.
pub static EMPTY_SOURCE: LazyLock<HashMap<&'static str, Vec<&'static str>>> = LazyLock::new(|| {
    HashMap::from([
        ("catgets-src", vec!["2.10.0-1"]),
        ("octave-octcdf-src", vec!["1.1.7-99"]),
        ("perl-File-Slurp-Unicode-src", vec!["0.7.1-2"]),
    ])
});

pub static EMPTY_BUT_NOT_OBSOLETE: LazyLock<HashMap<&'static str, Vec<&'static str>>> =
    LazyLock::new(|| {
        HashMap::from([("isl", vec!["0.16.1-1"]), ("mbedtls", vec!["2.16.0-1"])])
    });

/// package name or regex pattern -> replacement package that it was
/// historically obsoleted by. An empty replacement means "don't apply the
/// old-style-obsoletion upgrade heuristic" to this name.
pub static OLD_STYLE_OBSOLETE_BY: LazyLock<HashMap<&'static str, &'static str>> =
    LazyLock::new(|| {
        HashMap::from([
            ("at-spi2-atk", "libatk-bridge2.0_0"),
            ("idle3", "idle39"),
            ("octave-octcdf", "octave-netcdf"),
            ("python-gi-common", "python3-gi"),
            ("python-pyatspi-common", "python3-pyatspi"),
            ("qt-gstreamer", "libQtGStreamer1_0_0"),
            ("vim-lua", "vim"),
            ("vim-perl", "vim"),
            ("vim-python", "vim"),
            ("vim-python3", "vim"),
            ("vim-ruby", "vim"),
            ("python3-.*", ""),
            ("mate-utils", ""),
            ("python-twisted-debuginfo", ""),
            ("vte2.91", ""),
            ("cron-debuginfo", ""),
            ("texlive-collection-htmlxml", ""),
            ("w32api", ""),
        ])
    });

/// Resolve the old-style-obsoletion replacement for a package name,
/// consulting exact matches before regex patterns; an empty string means
/// the heuristic must not apply.
pub fn old_style_obsolete_by(name: &str) -> Option<&'static str> {
    if let Some(&r) = OLD_STYLE_OBSOLETE_BY.get(name) {
        return if r.is_empty() { None } else { Some(r) };
    }
    if name.starts_with("python3-") {
        return old_style_obsolete_lookup("python3-.*");
    }
    None
}

fn old_style_obsolete_lookup(pattern: &str) -> Option<&'static str> {
    OLD_STYLE_OBSOLETE_BY.get(pattern).copied().filter(|r| !r.is_empty())
}
