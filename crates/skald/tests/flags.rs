//! The optimisation layers are pure optimisation: every program must
//! behave identically with every flag on, everything off, and the
//! wider cache size.

use pretty_assertions::assert_eq;
use skald::{GlobalScope, Object, ResourceLimits, RuntimeFlags, Script};

const PROGRAMS: &[&str] = &[
    "var s=0; var i=0; while(i<1000){ s=s+i; i=i+1 }; s",
    "class C { var x=0; fun inc(){ this.x=this.x+1 } }; var c=C(); var i=0; while(i<100){ c.inc(); i=i+1 }; c.x",
    "val xs=[3,1,2]; xs.sort(); xs",
    "\"hello ${1+2}\"",
    "val m={\"a\":1,\"b\":2}; m[\"c\"]=3; m.keys().toList()",
    "fun f(x){ if(x==0) return 1; return x*f(x-1) }; f(10)",
    "var out = []; for (i in 1..20) { if (i % 3 == 0) continue; out.add(i * i) }; out.size()",
    "class A(v) { fun get(k) { this.v + k } }; val a = A(10); a[5] + a[1]",
    "fun Int.double() { this * 2 }; var t = 0; for (i in 1..50) t = t + i.double(); t",
    "/a+/.findAll(\"caravan\").size()",
    "try { [1,2][9] } catch(e: IndexError) { -1 }",
    "9223372036854775807 + 1 - 1",
];

fn run_with(flags: RuntimeFlags, src: &str) -> Object {
    let mut scope = GlobalScope::with_flags(flags, ResourceLimits::default());
    let script = Script::compile(src, "flags.sk").unwrap();
    script
        .execute(&mut scope)
        .unwrap_or_else(|err| panic!("execution failed for {src:?}: {err}"))
}

#[test]
fn every_flag_combination_observes_the_same_results() {
    let wide_pics = RuntimeFlags {
        pic_size: 4,
        ..RuntimeFlags::default()
    };
    for src in PROGRAMS {
        let reference = run_with(RuntimeFlags::all_off(), src);
        assert_eq!(run_with(RuntimeFlags::default(), src), reference, "{src}");
        assert_eq!(run_with(wide_pics, src), reference, "{src}");
    }
}

#[test]
fn each_flag_alone_matches_the_reference() {
    let src = PROGRAMS[1];
    let reference = run_with(RuntimeFlags::all_off(), src);
    for toggle in 0..7 {
        let mut flags = RuntimeFlags::all_off();
        match toggle {
            0 => flags.scope_pool = true,
            1 => flags.arg_builder = true,
            2 => flags.local_slot_pic = true,
            3 => flags.field_pic = true,
            4 => flags.method_pic = true,
            5 => flags.primitive_fastops = true,
            _ => flags.range_fast_iter = true,
        }
        assert_eq!(run_with(flags, src), reference, "flag #{toggle}");
    }
}

#[test]
fn method_redefinition_invalidates_call_sites() {
    // The same call site inside `probe` resolves the old method, then
    // the redefinition bumps the class version and the site must
    // observe the new one.
    let src = "class C { fun v() { 1 } }\n\
               val c = C()\n\
               fun probe(o) { o.v() }\n\
               val before = probe(c)\n\
               fun C.v() { 2 }\n\
               \"${before}:${probe(c)}\"";
    for flags in [RuntimeFlags::default(), RuntimeFlags::all_off()] {
        assert_eq!(run_with(flags, src), Object::Str("1:2".to_owned()));
    }
}

#[test]
fn extension_on_builtin_invalidates_cached_dispatch() {
    let src = "fun Int.tag() { \"old\" }\n\
               fun probe(n) { n.tag() }\n\
               val before = probe(1)\n\
               fun Int.tag() { \"new\" }\n\
               \"${before}:${probe(2)}\"";
    assert_eq!(
        run_with(RuntimeFlags::default(), src),
        Object::Str("old:new".to_owned())
    );
}

#[test]
fn field_sites_stay_correct_across_many_classes() {
    // Five receiver classes through one access site: the cache fills,
    // megamorphises, and must keep answering correctly.
    let src = "class A { var v = 1 }\n\
               class B { var v = 2 }\n\
               class C { var v = 3 }\n\
               class D { var v = 4 }\n\
               class E { var v = 5 }\n\
               fun read(o) { o.v }\n\
               val os = [A(), B(), C(), D(), E()]\n\
               var total = 0\n\
               for (o in os) total = total + read(o)\n\
               for (o in os) total = total + read(o)\n\
               total";
    for flags in [
        RuntimeFlags::default(),
        RuntimeFlags {
            pic_size: 4,
            ..RuntimeFlags::default()
        },
        RuntimeFlags::all_off(),
    ] {
        assert_eq!(run_with(flags, src), Object::Int(30));
    }
}

#[test]
fn shadowing_keeps_slot_caches_honest() {
    let src = "val x = 1\n\
               fun read() { x }\n\
               val a = read()\n\
               var out = []\n\
               for (i in 1..2) { val x = 99; out.add(x) }\n\
               \"${a}:${read()}:${out}\"";
    assert_eq!(
        run_with(RuntimeFlags::default(), src),
        Object::Str("1:1:[99, 99]".to_owned())
    );
}

#[test]
fn regex_cache_is_transparent() {
    let src = "var n = 0\n\
               for (i in 1..5) { if (/ab+/.matches(\"abb\")) n = n + 1 }\n\
               n";
    let mut no_cache = RuntimeFlags::default();
    no_cache.regex_cache = false;
    assert_eq!(run_with(RuntimeFlags::default(), src), Object::Int(5));
    assert_eq!(run_with(no_cache, src), Object::Int(5));
}
