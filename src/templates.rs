//! Generated file contents
//!
//! Plain string rendering; the layouts follow the files Debian's varnish
//! package ships so local admins recognise them.

use crate::config::{RepoConfig, VarnishConfig};

pub const VARNISH_DEFAULT_PATH: &str = "/etc/default/varnish";
pub const NCSA_DEFAULT_PATH: &str = "/etc/default/varnishncsa";
pub const NCSA_INIT_PATH: &str = "/etc/init.d/varnishncsa";
pub const APT_SOURCE_PATH: &str = "/etc/apt/sources.list.d/varnish.list";
pub const APT_KEY_PATH: &str = "/etc/apt/varnish-cache.key";

const MANAGED: &str = "# Managed by varnish-converge. Local changes will be overwritten.";

/// `/etc/default/varnish`
pub fn varnish_default(v: &VarnishConfig, with_secret: bool) -> String {
    let mut opts = vec![
        format!("-a {}:{}", v.listen_address, v.listen_port),
        format!("-T {}:{}", v.admin_listen_address, v.admin_listen_port),
        format!("-f {}", v.vcl_conf),
    ];
    if with_secret {
        opts.push(format!("-S {}", v.secret_file));
    }
    if v.instance != "default" {
        opts.push(format!("-n {}", v.instance));
    }
    opts.push(format!("-s {}", v.storage));
    opts.push(format!(
        "-w {},{},{}",
        v.min_threads, v.max_threads, v.thread_timeout
    ));
    opts.push(format!("-t {}", v.ttl));

    format!(
        "{MANAGED}

# Should we start varnishd at boot?  Set to \"no\" to disable.
START={start}

# Maximum number of open files (for ulimit -n)
NFILES={nfiles}

# Maximum locked memory size (for ulimit -l)
# Used for locking the shared memory log in memory.  If you increase log size,
# you need to increase this number as well
MEMLOCK={memlock}

INSTANCE={instance}

DAEMON_OPTS=\"{opts}\"
",
        start = yes_no(v.start_service),
        nfiles = v.nfiles,
        memlock = v.memlock,
        instance = v.instance,
        opts = opts.join(" \\\n             "),
    )
}

/// `/etc/default/varnishncsa`
pub fn ncsa_default(v: &VarnishConfig) -> String {
    let enabled = if v.start_ncsa {
        "VARNISHNCSA_ENABLED=1"
    } else {
        "#VARNISHNCSA_ENABLED=1"
    };
    format!(
        "{MANAGED}

# Configuration file for varnishncsa
#
# To disable logging, set the variable to \"0\", \"no\", or leave it unset.
#
# NCSA log format, to be used by HTTP log analyzers
# Log file: {log}
{enabled}
",
        log = v.ncsa_log_file,
    )
}

const NCSA_INIT: &str = r#"#! /bin/sh

### BEGIN INIT INFO
# Provides:          varnishncsa
# Required-Start:    $local_fs $remote_fs $network varnish
# Required-Stop:     $local_fs $remote_fs $network
# Default-Start:     2 3 4 5
# Default-Stop:      0 1 6
# Short-Description: Start HTTP accelerator log daemon
# Description:       This script provides logging for varnish
### END INIT INFO

@MANAGED@

PATH=/sbin:/bin:/usr/sbin:/usr/bin
DAEMON=/usr/bin/varnishncsa
NAME=varnishncsa
DESC="HTTP accelerator log daemon"
PIDFILE=/run/$NAME/$NAME.pid
LOGFILE=@LOGFILE@
USER=varnishlog
DAEMON_OPTS="-a -w ${LOGFILE} -D -P ${PIDFILE}"

test -x $DAEMON || exit 0

[ -r /etc/default/$NAME ] && . /etc/default/$NAME

. /lib/lsb/init-functions

start_it() {
    case "$VARNISHNCSA_ENABLED" in
        [Nn]*|0|"")
            log_warning_msg "Not starting $DESC, disabled via /etc/default/$NAME"
            return 0
            ;;
    esac
    install -o $USER -g adm -d "$(dirname $PIDFILE)" "$(dirname $LOGFILE)"
    log_daemon_msg "Starting $DESC" "$NAME"
    start-stop-daemon --start --quiet --pidfile $PIDFILE --chuid $USER \
        --exec $DAEMON -- $DAEMON_OPTS
    log_end_msg $?
}

stop_it() {
    log_daemon_msg "Stopping $DESC" "$NAME"
    start-stop-daemon --stop --quiet --retry 10 --pidfile $PIDFILE --exec $DAEMON
    log_end_msg $?
    rm -f $PIDFILE
}

reload_it() {
    start-stop-daemon --stop --signal HUP --quiet --pidfile $PIDFILE --exec $DAEMON
}

case "$1" in
    start)
        start_it
        ;;
    stop)
        stop_it
        ;;
    reload)
        reload_it
        ;;
    restart|force-reload)
        stop_it
        start_it
        ;;
    status)
        status_of_proc -p $PIDFILE $DAEMON $NAME && exit 0 || exit $?
        ;;
    *)
        log_success_msg "Usage: /etc/init.d/$NAME {start|stop|restart|force-reload|reload|status}"
        exit 1
        ;;
esac

exit 0
"#;

/// `/etc/init.d/varnishncsa`
pub fn ncsa_init(v: &VarnishConfig) -> String {
    NCSA_INIT
        .replace("@MANAGED@", MANAGED)
        .replace("@LOGFILE@", &v.ncsa_log_file)
}

/// `/etc/apt/sources.list.d/varnish.list`
pub fn apt_source(repo: &RepoConfig) -> String {
    format!(
        "{MANAGED}\ndeb {url} {codename} {release}\ndeb-src {url} {codename} {release}\n",
        url = repo.url,
        codename = repo.codename,
        release = repo.release,
    )
}

fn yes_no(flag: bool) -> &'static str {
    if flag { "yes" } else { "no" }
}
